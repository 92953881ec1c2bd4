//! Orchestration and secure messaging for independent services.
//!
//! A service is assembled from controllers that talk over ZeroMQ sockets,
//! optionally CURVE-authenticated. The [`Orchestrator`] checks the service's
//! configuration against the proxies and extensions it depends on before any
//! controller starts, then runs them concurrently.

pub mod auth;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod service;
pub mod transport;

// Re-export commonly used types
pub use auth::AuthRegistry;
pub use broadcast::SecureBroadcaster;
pub use config::{AppConfig, ServiceConfig};
pub use context::{DependencyContext, DevContext};
pub use controller::{Controller, ControllerType, Replier, Subscriber};
pub use error::{Error, Result};
pub use message::{BroadcastMessage, Reply, Request};
pub use orchestrator::Orchestrator;
pub use service::{AddressingMode, Credentials, Service, ServiceIdentity, ServiceType};
