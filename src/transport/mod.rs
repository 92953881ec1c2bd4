//! Endpoint configuration with optional CurveZMQ security.
//!
//! `TransportConfig` pairs a ZMQ endpoint string (`inproc://`, `tcp://`) with
//! the CURVE role the socket plays on it, and applies both to a raw
//! `zmq::Socket` before binding or connecting.
//!
//! # Security Layers
//!
//! - **Server** sockets (bind) carry their secret key and a ZAP domain. The
//!   `AuthRegistry` handler decides which client keys the domain accepts.
//! - **Client** sockets (connect) carry the server's public key and their own
//!   keypair, whose public half must be whitelisted on the server's domain.

pub mod context;

pub use context::global_context;

use crate::error::{Error, Result};
use crate::service::credentials::decode_key;
use crate::service::{Credentials, Service};

/// CurveZMQ role and key material for one socket.
#[derive(Clone, PartialEq, Eq)]
pub enum CurveConfig {
    Server {
        secret_key: String,
        domain: String,
    },
    Client {
        server_public_key: String,
        public_key: String,
        secret_key: String,
    },
}

impl std::fmt::Debug for CurveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CurveConfig::Server { domain, .. } => f
                .debug_struct("Server")
                .field("domain", domain)
                .finish_non_exhaustive(),
            CurveConfig::Client {
                server_public_key,
                public_key,
                ..
            } => f
                .debug_struct("Client")
                .field("server_public_key", server_public_key)
                .field("public_key", public_key)
                .finish_non_exhaustive(),
        }
    }
}

impl CurveConfig {
    /// Server role from our own keypair.
    pub fn server(credentials: &Credentials, domain: impl Into<String>) -> Result<Self> {
        let secret_key = credentials
            .secret_key()
            .ok_or_else(|| Error::auth("curve server needs a secret key"))?;
        Ok(CurveConfig::Server {
            secret_key: secret_key.to_owned(),
            domain: domain.into(),
        })
    }

    /// Client role: the server's public key plus our own keypair.
    pub fn client(server: &Credentials, own: &Credentials) -> Result<Self> {
        let secret_key = own
            .secret_key()
            .ok_or_else(|| Error::auth("curve client needs its own keypair"))?;
        Ok(CurveConfig::Client {
            server_public_key: server.public_key().to_owned(),
            public_key: own.public_key().to_owned(),
            secret_key: secret_key.to_owned(),
        })
    }
}

/// ZMQ endpoint with optional CurveZMQ configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    endpoint: String,
    curve: Option<CurveConfig>,
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            curve: None,
        }
    }

    /// Transport for a service's broadcast endpoint.
    pub fn broadcast(service: &Service) -> Result<Self> {
        service
            .broadcast_endpoint()
            .map(Self::new)
            .ok_or_else(|| {
                Error::config(format!("service '{}' has no broadcast endpoint", service.name()))
            })
    }

    /// Transport for a service's reply endpoint.
    pub fn reply(service: &Service) -> Result<Self> {
        service.reply_endpoint().map(Self::new).ok_or_else(|| {
            Error::config(format!("service '{}' has no reply endpoint", service.name()))
        })
    }

    pub fn with_curve(mut self, curve: CurveConfig) -> Self {
        self.curve = Some(curve);
        self
    }

    pub fn zmq_endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn curve(&self) -> Option<&CurveConfig> {
        self.curve.as_ref()
    }

    pub fn is_inproc(&self) -> bool {
        self.endpoint.starts_with("inproc://")
    }

    /// Apply CurveZMQ options to a socket.
    ///
    /// Returns `Ok(false)` when no CURVE configuration is set.
    pub fn apply_curve(&self, socket: &zmq::Socket) -> Result<bool> {
        let Some(ref curve) = self.curve else {
            return Ok(false);
        };

        match curve {
            CurveConfig::Server { secret_key, domain } => {
                socket.set_zap_domain(domain)?;
                socket.set_curve_server(true).map_err(curve_error)?;
                socket
                    .set_curve_secretkey(&decode_key(secret_key)?)
                    .map_err(curve_error)?;
            }
            CurveConfig::Client {
                server_public_key,
                public_key,
                secret_key,
            } => {
                socket
                    .set_curve_serverkey(&decode_key(server_public_key)?)
                    .map_err(curve_error)?;
                socket
                    .set_curve_publickey(&decode_key(public_key)?)
                    .map_err(curve_error)?;
                socket
                    .set_curve_secretkey(&decode_key(secret_key)?)
                    .map_err(curve_error)?;
            }
        }
        Ok(true)
    }

    /// Apply CURVE (if any) and bind.
    pub fn bind(&self, socket: &zmq::Socket) -> Result<()> {
        self.apply_curve(socket)?;
        socket
            .bind(&self.endpoint)
            .map_err(|e| Error::network(&self.endpoint, e))
    }

    /// Apply CURVE (if any) and connect.
    pub fn connect(&self, socket: &zmq::Socket) -> Result<()> {
        self.apply_curve(socket)?;
        socket
            .connect(&self.endpoint)
            .map_err(|e| Error::network(&self.endpoint, e))
    }
}

fn curve_error(e: zmq::Error) -> Error {
    if e == zmq::Error::ENOTSUP {
        Error::auth("CurveZMQ not supported by this libzmq build")
    } else {
        Error::auth(format!("failed to configure CurveZMQ: {}", e))
    }
}
