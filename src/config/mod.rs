//! Configuration for servicekit services.
//!
//! Two layers:
//! - `AppConfig`: flat key/value settings (defaults + process environment),
//!   the source of every `<NAME>_HOST`, `<NAME>_PORT`, ... lookup
//! - `ServiceConfig`: the persisted per-service YAML document holding
//!   controllers, instances, proxies and extensions

pub mod app;
pub mod service;

pub use app::AppConfig;
pub use service::{
    ControllerConfig, ControllerInstance, ExtensionConfig, ProxyConfig, ServiceConfig,
    DESTINATION_NAME, SOURCE_NAME,
};
