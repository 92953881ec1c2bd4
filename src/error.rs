//! Error types for servicekit.

use thiserror::Error;

/// A specialized Result type for servicekit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving, preparing or running a service.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid environment/file configuration, or a type mismatch.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No free port could be allocated for a controller instance.
    #[error("port allocation failed: {0}")]
    PortAllocation(String),

    /// Security was requested but key material is unobtainable or invalid.
    #[error("auth error: {0}")]
    Auth(String),

    /// Local and dependency configuration disagree on a URL or port.
    #[error("dependency mismatch for '{url}': {reason}")]
    DependencyMismatch { url: String, reason: String },

    /// Bind, connect or publish failure.
    #[error("network error on {endpoint}: {reason}")]
    Network { endpoint: String, reason: String },

    /// A controller returned an error from its run loop.
    #[error("controller '{name}' failed: {source}")]
    ControllerFailed {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// A controller task panicked or was cancelled.
    #[error("task aborted: {0}")]
    TaskAborted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub(crate) fn auth(msg: impl Into<String>) -> Self {
        Error::Auth(msg.into())
    }

    pub(crate) fn network(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Network {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn mismatch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DependencyMismatch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether the process cannot safely continue after this error.
    ///
    /// Socket failures and controller failures leave no usable partial state;
    /// the top-level supervisor terminates the process on them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Network { .. }
                | Error::ControllerFailed { .. }
                | Error::TaskAborted(_)
                | Error::Zmq(_)
        )
    }
}
