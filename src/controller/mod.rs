//! Controllers: the units of service functionality the orchestrator runs.
//!
//! Every controller exposes the same capability set through [`Controller`]:
//! it declares its transport role and the extension URLs it needs, accepts
//! the configuration the orchestrator resolved for it, and runs until
//! terminated. Concrete roles live in submodules:
//!
//! - [`Replier`] answers JSON requests on a REP socket
//! - [`Subscriber`] consumes a broadcaster's two-frame messages

mod replier;
mod subscriber;

pub use replier::{Handler, Replier};
pub use subscriber::{Callback, Subscriber};

use crate::config::{ControllerConfig, ExtensionConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

/// Transport role of a controller, persisted as the controller `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    Replier,
    Subscriber,
}

impl fmt::Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerType::Replier => f.write_str("replier"),
            ControllerType::Subscriber => f.write_str("subscriber"),
        }
    }
}

/// Uniform lifecycle of a controller.
///
/// The orchestrator calls `add_config` and `add_extension_config` during
/// preparation, then `run` once on its own task.
#[async_trait]
pub trait Controller: Send + Sync {
    fn controller_type(&self) -> ControllerType;

    /// URLs of the extension services this controller talks to.
    fn required_extensions(&self) -> Vec<String>;

    fn add_config(&mut self, config: ControllerConfig);

    fn add_extension_config(&mut self, extension: ExtensionConfig);

    /// Run until terminated. An error here is fatal to the whole service.
    async fn run(&self) -> Result<()>;
}

/// Configuration attached to a controller by the orchestrator.
#[derive(Debug, Clone, Default)]
pub(crate) struct Wiring {
    config: Option<ControllerConfig>,
    required: Vec<String>,
    extensions: HashMap<String, ExtensionConfig>,
}

impl Wiring {
    pub(crate) fn require(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !self.required.contains(&url) {
            self.required.push(url);
        }
    }

    pub(crate) fn required(&self) -> Vec<String> {
        self.required.clone()
    }

    pub(crate) fn set_config(&mut self, config: ControllerConfig) {
        self.config = Some(config);
    }

    pub(crate) fn config(&self) -> Option<&ControllerConfig> {
        self.config.as_ref()
    }

    pub(crate) fn add_extension(&mut self, extension: ExtensionConfig) {
        self.extensions.insert(extension.url.clone(), extension);
    }

    pub(crate) fn extension(&self, url: &str) -> Option<&ExtensionConfig> {
        self.extensions.get(url)
    }

    /// Port of the first configured instance.
    pub(crate) fn port(&self, name: &str) -> Result<u64> {
        self.config
            .as_ref()
            .and_then(ControllerConfig::first_instance)
            .map(|instance| instance.port)
            .filter(|port| (1..=u64::from(u16::MAX)).contains(port))
            .ok_or_else(|| Error::config(format!("controller '{}' has no configured instance", name)))
    }
}

/// Run a blocking socket loop on a dedicated thread and await its result.
///
/// Socket loops block in `recv` forever, so they get their own thread
/// rather than a slot in the runtime's blocking pool.
pub(crate) async fn run_on_thread<F>(name: &str, work: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(format!("controller-{}", name))
        .spawn(move || {
            let _ = tx.send(work());
        })?;

    rx.await
        .map_err(|_| Error::config(format!("controller '{}' thread exited without a result", name)))?
}
