//! Authenticated publish socket for one service.
//!
//! Producers enqueue `BroadcastMessage`s through a bounded channel; a single
//! consumer loop publishes each as a two-frame `[topic, payload]` message in
//! enqueue order. When the service carries a keypair the socket is a CURVE
//! server in the `<service>_broadcast` domain, and only keys whitelisted via
//! `set_auth_domain` may subscribe.
//!
//! Bind and publish failures are unrecoverable: they are returned as
//! `Error::Network`, which the top-level supervisor treats as fatal.
//!
//! # Usage
//!
//! ```ignore
//! let mut broadcaster = SecureBroadcaster::new(service, &context, auth)?;
//! broadcaster.set_auth_domain(subscriber_keys)?;
//! broadcaster.bind()?;
//!
//! let sender = broadcaster.sender();
//! tokio::spawn(broadcaster.run());
//! sender.send(BroadcastMessage::new("block", payload)).await?;
//! ```

use crate::auth::AuthRegistry;
use crate::error::{Error, Result};
use crate::message::BroadcastMessage;
use crate::service::Service;
use crate::transport::{CurveConfig, TransportConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Tuning for the broadcaster queue and socket.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Channel capacity; producers wait once it is full.
    pub channel_buffer: usize,
    /// High water mark for outbound messages (0 = unlimited)
    pub send_hwm: i32,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1000,
            send_hwm: 1000,
        }
    }
}

/// Owns one PUB socket and the queue feeding it.
pub struct SecureBroadcaster {
    service: Service,
    auth: Arc<AuthRegistry>,
    transport: TransportConfig,
    socket: Mutex<zmq::Socket>,
    sender: mpsc::Sender<BroadcastMessage>,
    receiver: mpsc::Receiver<BroadcastMessage>,
    bound: bool,
}

impl SecureBroadcaster {
    /// Create a broadcaster with default configuration.
    ///
    /// The service must have a broadcast endpoint (`Broadcast` or `InProcess`).
    pub fn new(service: Service, context: &zmq::Context, auth: Arc<AuthRegistry>) -> Result<Self> {
        Self::with_config(service, context, auth, BroadcasterConfig::default())
    }

    pub fn with_config(
        service: Service,
        context: &zmq::Context,
        auth: Arc<AuthRegistry>,
        config: BroadcasterConfig,
    ) -> Result<Self> {
        let mut transport = TransportConfig::broadcast(&service)?;
        if let Some(credentials) = service.credentials() {
            transport = transport.with_curve(CurveConfig::server(
                credentials,
                service.broadcast_domain(),
            )?);
        }

        let socket = context.socket(zmq::PUB)?;
        if let Err(e) = socket.set_sndhwm(config.send_hwm) {
            warn!("Failed to set send HWM: {}", e);
        }
        socket.set_linger(0)?;

        let (sender, receiver) = mpsc::channel(config.channel_buffer.max(1));

        Ok(Self {
            service,
            auth,
            transport,
            socket: Mutex::new(socket),
            sender,
            receiver,
            bound: false,
        })
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Authentication domain subscribers are checked against.
    pub fn domain(&self) -> String {
        self.service.broadcast_domain()
    }

    pub fn endpoint(&self) -> &str {
        self.transport.zmq_endpoint()
    }

    /// Register the broadcast domain and whitelist subscriber public keys.
    ///
    /// Call before `bind()` when the service is secured.
    pub fn set_auth_domain<I, K>(&self, accounts: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.auth.allow(&self.domain(), accounts)
    }

    /// A producer handle; clone freely.
    pub fn sender(&self) -> mpsc::Sender<BroadcastMessage> {
        self.sender.clone()
    }

    /// Bind the publish socket.
    pub fn bind(&mut self) -> Result<()> {
        if self.bound {
            return Ok(());
        }
        if self.service.is_secure() && !self.auth.has_domain(&self.domain()) {
            warn!(
                domain = %self.domain(),
                "secured broadcaster has no whitelisted subscribers"
            );
        }

        self.transport.bind(&self.socket.lock())?;
        self.bound = true;
        info!(
            service = %self.service.name(),
            endpoint = %self.endpoint(),
            secure = self.service.is_secure(),
            "broadcaster bound"
        );
        Ok(())
    }

    /// Publish one message immediately.
    pub fn publish(&self, message: &BroadcastMessage) -> Result<()> {
        send_frames(&self.socket, message)
            .map_err(|e| Error::network(self.endpoint(), format!("publish failed: {}", e)))
    }

    /// Drain the queue into the socket, binding first if needed.
    ///
    /// Runs for the lifetime of the service; returns `Ok` only once every
    /// producer handle has been dropped.
    pub async fn run(mut self) -> Result<()> {
        self.bind()?;

        let Self {
            service,
            auth: _auth,
            transport,
            socket,
            sender,
            mut receiver,
            bound: _,
        } = self;
        drop(sender);

        info!(service = %service.name(), "waiting for new messages...");

        while let Some(message) = receiver.recv().await {
            debug!(topic = %message.topic, bytes = message.payload.len(), "broadcast a new message");

            if let Err(e) = send_frames(&socket, &message) {
                return Err(Error::network(
                    transport.zmq_endpoint(),
                    format!("publish failed: {}", e),
                ));
            }
        }

        debug!(service = %service.name(), "all producers gone, broadcaster stopping");
        Ok(())
    }
}

/// Send `[topic, payload]` while holding the socket lock.
fn send_frames(socket: &Mutex<zmq::Socket>, message: &BroadcastMessage) -> zmq::Result<()> {
    let socket = socket.lock();
    socket.send(message.topic.as_bytes(), zmq::SNDMORE)?;
    socket.send(message.payload.as_slice(), 0)
}
