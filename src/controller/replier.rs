//! Request/reply controller.
//!
//! Binds a REP socket on the first configured instance port and answers each
//! JSON `Request` with a JSON `Reply`. Unknown commands, handler errors and
//! malformed frames are answered with a `fail` reply; only socket failures
//! end the loop.

use super::{run_on_thread, Controller, ControllerType, Wiring};
use crate::config::{ControllerConfig, ExtensionConfig};
use crate::error::{Error, Result};
use crate::message::{Reply, Request};
use crate::service::Credentials;
use crate::transport::{CurveConfig, TransportConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Command handler.
pub type Handler = Arc<dyn Fn(&Request) -> Result<Reply> + Send + Sync>;

type Routes = HashMap<String, Handler>;

pub struct Replier {
    name: String,
    context: Arc<zmq::Context>,
    routes: Routes,
    wiring: Wiring,
    credentials: Option<Credentials>,
    endpoint: Option<String>,
}

impl Replier {
    pub fn new(name: impl Into<String>, context: Arc<zmq::Context>) -> Self {
        Self {
            name: name.into(),
            context,
            routes: HashMap::new(),
            wiring: Wiring::default(),
            credentials: None,
            endpoint: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the handler for `command`, replacing any previous one.
    pub fn route<F>(mut self, command: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Reply> + Send + Sync + 'static,
    {
        self.routes.insert(command.into(), Arc::new(handler));
        self
    }

    /// Declare an extension this replier depends on.
    pub fn require_extension(mut self, url: impl Into<String>) -> Self {
        self.wiring.require(url);
        self
    }

    /// Serve as a CURVE server with our own keypair.
    pub fn with_curve(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Bind somewhere other than `tcp://*:<instance port>`.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// ZAP domain client keys must be whitelisted on when CURVE is enabled.
    pub fn auth_domain(&self) -> String {
        format!("{}_reply", self.name)
    }

    pub fn config(&self) -> Option<&ControllerConfig> {
        self.wiring.config()
    }

    pub fn extension(&self, url: &str) -> Option<&ExtensionConfig> {
        self.wiring.extension(url)
    }

    /// Answer one request frame.
    pub fn handle(&self, frame: &[u8]) -> Vec<u8> {
        dispatch(&self.routes, frame)
    }

    fn transport(&self) -> Result<TransportConfig> {
        let endpoint = match self.endpoint {
            Some(ref endpoint) => endpoint.clone(),
            None => format!("tcp://*:{}", self.wiring.port(&self.name)?),
        };

        let mut transport = TransportConfig::new(endpoint);
        if let Some(ref credentials) = self.credentials {
            transport = transport.with_curve(CurveConfig::server(credentials, self.auth_domain())?);
        }
        Ok(transport)
    }
}

#[async_trait]
impl Controller for Replier {
    fn controller_type(&self) -> ControllerType {
        ControllerType::Replier
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
        let socket = self.context.socket(zmq::REP)?;
        socket.set_linger(0)?;
        transport.bind(&socket)?;

        info!(
            controller = %self.name,
            endpoint = %transport.zmq_endpoint(),
            routes = self.routes.len(),
            "replier listening"
        );

        let routes = self.routes.clone();
        let endpoint = transport.zmq_endpoint().to_owned();
        run_on_thread(&self.name, move || serve(socket, &routes, &endpoint)).await
    }
}

fn serve(socket: zmq::Socket, routes: &Routes, endpoint: &str) -> Result<()> {
    loop {
        let frame = socket
            .recv_bytes(0)
            .map_err(|e| Error::network(endpoint, format!("receive failed: {}", e)))?;
        let reply = dispatch(routes, &frame);
        socket
            .send(reply, 0)
            .map_err(|e| Error::network(endpoint, format!("reply failed: {}", e)))?;
    }
}

fn dispatch(routes: &Routes, frame: &[u8]) -> Vec<u8> {
    let reply = match Request::from_bytes(frame) {
        Ok(request) => {
            trace!(command = %request.command, "request received");
            match routes.get(&request.command) {
                Some(handler) => handler(&request).unwrap_or_else(|e| {
                    debug!(command = %request.command, error = %e, "handler failed");
                    Reply::failure(e.to_string())
                }),
                None => Reply::failure(format!("unknown command '{}'", request.command)),
            }
        }
        Err(e) => {
            warn!("malformed request: {}", e);
            Reply::failure(format!("malformed request: {}", e))
        }
    };

    match reply.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to encode reply: {}", e);
            br#"{"status":"fail","message":"failed to encode reply"}"#.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerInstance;
    use crate::message::ReplyStatus;
    use serde_json::{json, Map};

    fn replier() -> Replier {
        Replier::new("main", Arc::new(zmq::Context::new()))
            .route("ping", |_| Ok(Reply::ok(Map::new())))
            .route("echo", |request| Ok(Reply::ok(request.parameters.clone())))
            .route("broken", |_| Err(Error::config("no backend")))
    }

    fn answer(replier: &Replier, request: &Request) -> Reply {
        Reply::from_bytes(&replier.handle(&request.to_bytes().unwrap())).unwrap()
    }

    #[test]
    fn test_routes_by_command() {
        let replier = replier();
        assert!(answer(&replier, &Request::new("ping")).is_ok());

        let reply = answer(&replier, &Request::new("echo").with_parameter("n", 7));
        assert_eq!(reply.parameters["n"], json!(7));
    }

    #[test]
    fn test_failures_become_fail_replies() {
        let replier = replier();

        let reply = answer(&replier, &Request::new("missing"));
        assert_eq!(reply.status, ReplyStatus::Fail);
        assert!(reply.message.contains("missing"));

        let reply = answer(&replier, &Request::new("broken"));
        assert_eq!(reply.status, ReplyStatus::Fail);
        assert!(reply.message.contains("no backend"));

        let reply = Reply::from_bytes(&replier.handle(b"not json")).unwrap();
        assert_eq!(reply.status, ReplyStatus::Fail);
    }

    #[test]
    fn test_endpoint_from_instance_port() {
        let mut replier = replier();
        assert!(matches!(replier.transport(), Err(Error::Configuration(_))));

        let mut config = ControllerConfig::new(ControllerType::Replier, "main");
        config.instances.push(ControllerInstance {
            name: "main".into(),
            instance: "main1".into(),
            port: 40123,
        });
        replier.add_config(config);
        assert_eq!(replier.transport().unwrap().zmq_endpoint(), "tcp://*:40123");
        assert_eq!(replier.auth_domain(), "main_reply");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_serves_requests() {
        let context = Arc::new(zmq::Context::new());
        let replier = Replier::new("live", context.clone())
            .with_endpoint("inproc://replier-test")
            .route("ping", |_| {
                let mut parameters = Map::new();
                parameters.insert("pong".into(), json!(true));
                Ok(Reply::ok(parameters))
            });
        let server = tokio::spawn(async move { replier.run().await });

        let reply = tokio::task::spawn_blocking(move || {
            let client = context.socket(zmq::REQ).unwrap();
            client.set_rcvtimeo(5000).unwrap();
            client.connect("inproc://replier-test").unwrap();
            client
                .send(Request::new("ping").to_bytes().unwrap(), 0)
                .unwrap();
            Reply::from_bytes(&client.recv_bytes(0).unwrap()).unwrap()
        })
        .await
        .unwrap();

        assert!(reply.is_ok());
        assert_eq!(reply.parameters["pong"], json!(true));
        server.abort();
    }
}
