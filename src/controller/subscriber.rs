//! Broadcast consumer controller.

use super::{run_on_thread, Controller, ControllerType, Wiring};
use crate::config::{ControllerConfig, ExtensionConfig};
use crate::error::{Error, Result};
use crate::message::BroadcastMessage;
use crate::service::{Credentials, Service};
use crate::transport::{CurveConfig, TransportConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, trace, warn};

/// Receives every message matching the subscribed topics.
pub type Callback = Arc<dyn Fn(BroadcastMessage) -> Result<()> + Send + Sync>;

/// Connects a SUB socket to a broadcaster and hands each message to a
/// callback. Callback errors are logged and the loop continues.
pub struct Subscriber {
    name: String,
    context: Arc<zmq::Context>,
    service: Service,
    topics: Vec<String>,
    client_keys: Option<Credentials>,
    callback: Callback,
    wiring: Wiring,
}

impl Subscriber {
    /// `service` must have a broadcast endpoint, normally resolved in
    /// `Subscribe` mode.
    pub fn new<F>(
        name: impl Into<String>,
        context: Arc<zmq::Context>,
        service: Service,
        callback: F,
    ) -> Result<Self>
    where
        F: Fn(BroadcastMessage) -> Result<()> + Send + Sync + 'static,
    {
        if service.broadcast_endpoint().is_none() {
            return Err(Error::config(format!(
                "service '{}' has no broadcast endpoint to subscribe to",
                service.name()
            )));
        }

        Ok(Self {
            name: name.into(),
            context,
            service,
            topics: Vec::new(),
            client_keys: None,
            callback: Arc::new(callback),
            wiring: Wiring::default(),
        })
    }

    /// Only receive topics starting with `prefix`. Without any, all topics
    /// are received.
    pub fn topic(mut self, prefix: impl Into<String>) -> Self {
        self.topics.push(prefix.into());
        self
    }

    /// Our keypair, needed when the broadcaster is CURVE-secured.
    pub fn with_client_keys(mut self, keys: Credentials) -> Self {
        self.client_keys = Some(keys);
        self
    }

    pub fn require_extension(mut self, url: impl Into<String>) -> Self {
        self.wiring.require(url);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension(&self, url: &str) -> Option<&ExtensionConfig> {
        self.wiring.extension(url)
    }

    fn transport(&self) -> Result<TransportConfig> {
        let transport = TransportConfig::broadcast(&self.service)?;
        let Some(server) = self.service.credentials() else {
            return Ok(transport);
        };

        let own = self.client_keys.as_ref().ok_or_else(|| {
            Error::auth(format!(
                "broadcaster '{}' is secured, subscriber '{}' has no client keypair",
                self.service.name(),
                self.name
            ))
        })?;
        Ok(transport.with_curve(CurveConfig::client(server, own)?))
    }
}

#[async_trait]
impl Controller for Subscriber {
    fn controller_type(&self) -> ControllerType {
        ControllerType::Subscriber
    }

    fn required_extensions(&self) -> Vec<String> {
        self.wiring.required()
    }

    fn add_config(&mut self, config: ControllerConfig) {
        self.wiring.set_config(config);
    }

    fn add_extension_config(&mut self, extension: ExtensionConfig) {
        self.wiring.add_extension(extension);
    }

    async fn run(&self) -> Result<()> {
        let transport = self.transport()?;
        let socket = self.context.socket(zmq::SUB)?;
        socket.set_linger(0)?;
        transport.connect(&socket)?;

        if self.topics.is_empty() {
            socket.set_subscribe(b"")?;
        }
        for topic in &self.topics {
            socket.set_subscribe(topic.as_bytes())?;
        }

        info!(
            controller = %self.name,
            endpoint = %transport.zmq_endpoint(),
            topics = ?self.topics,
            "subscriber connected"
        );

        let callback = Arc::clone(&self.callback);
        let endpoint = transport.zmq_endpoint().to_owned();
        run_on_thread(&self.name, move || consume(socket, &callback, &endpoint)).await
    }
}

fn consume(socket: zmq::Socket, callback: &Callback, endpoint: &str) -> Result<()> {
    loop {
        let frames = socket
            .recv_multipart(0)
            .map_err(|e| Error::network(endpoint, format!("receive failed: {}", e)))?;

        let Some(message) = BroadcastMessage::from_frames(frames) else {
            warn!(endpoint, "dropping broadcast that is not [topic, payload]");
            continue;
        };

        trace!(topic = %message.topic, "broadcast received");
        if let Err(e) = callback(message) {
            warn!(endpoint, error = %e, "subscriber callback failed");
        }
    }
}
