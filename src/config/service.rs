//! Persisted service configuration.
//!
//! One YAML document per service:
//!
//! ```yaml
//! type: CATEGORIZER
//! url: github.com/example/categorizer
//! instance_name: categorizer 1
//! controllers:
//!   - type: replier
//!     name: main
//!     instances:
//!       - name: main
//!         instance: main1
//!         port: 40123
//! proxies:
//!   - url: github.com/example/auth-proxy
//!     port: 40200
//! extensions: []
//! ```

use crate::controller::ControllerType;
use crate::error::{Error, Result};
use crate::service::ServiceType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Well-known controller name of a proxy's upstream-facing side.
pub const SOURCE_NAME: &str = "source";

/// Well-known controller name a proxy forwards to.
pub const DESTINATION_NAME: &str = "destination";

/// Root of the persisted configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub url: String,
    pub instance_name: String,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
    #[serde(default)]
    pub extensions: Vec<ExtensionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(rename = "type")]
    pub controller_type: ControllerType,
    pub name: String,
    #[serde(default)]
    pub instances: Vec<ControllerInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInstance {
    pub name: String,
    pub instance: String,
    pub port: u64,
}

/// A proxy this service sits behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    pub port: u64,
}

/// An auxiliary service a controller talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    pub url: String,
    pub port: u64,
}

impl ServiceConfig {
    pub fn new(
        service_type: ServiceType,
        url: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            service_type,
            url: url.into(),
            instance_name: instance_name.into(),
            controllers: Vec::new(),
            proxies: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// Read a configuration file.
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Read a configuration file, returning `None` if it does not exist.
    pub fn read_optional(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::read(path).map(Some)
    }

    /// Write the configuration, creating parent directories as needed.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn controller(&self, name: &str) -> Option<&ControllerConfig> {
        self.controllers.iter().find(|c| c.name == name)
    }

    /// Insert or replace a controller entry by name.
    pub fn set_controller(&mut self, controller: ControllerConfig) {
        match self.controllers.iter_mut().find(|c| c.name == controller.name) {
            Some(existing) => *existing = controller,
            None => self.controllers.push(controller),
        }
    }

    pub fn proxy(&self, url: &str) -> Option<&ProxyConfig> {
        self.proxies.iter().find(|p| p.url == url)
    }

    pub fn set_proxy(&mut self, proxy: ProxyConfig) {
        match self.proxies.iter_mut().find(|p| p.url == proxy.url) {
            Some(existing) => *existing = proxy,
            None => self.proxies.push(proxy),
        }
    }

    pub fn extension(&self, url: &str) -> Option<&ExtensionConfig> {
        self.extensions.iter().find(|e| e.url == url)
    }

    pub fn set_extension(&mut self, extension: ExtensionConfig) {
        match self.extensions.iter_mut().find(|e| e.url == extension.url) {
            Some(existing) => *existing = extension,
            None => self.extensions.push(extension),
        }
    }

    /// Describe this service as a proxy dependency.
    ///
    /// The port is the one the proxy's `source` controller listens on. A proxy
    /// must also declare its `destination` controller.
    pub fn to_proxy(&self) -> Result<ProxyConfig> {
        let source = self.controller(SOURCE_NAME).ok_or_else(|| {
            Error::config(format!("proxy '{}' has no '{}' controller", self.url, SOURCE_NAME))
        })?;
        if self.controller(DESTINATION_NAME).is_none() {
            return Err(Error::config(format!(
                "proxy '{}' has no '{}' controller",
                self.url, DESTINATION_NAME
            )));
        }
        let instance = source.first_instance().ok_or_else(|| {
            Error::config(format!("proxy '{}' source has no instances", self.url))
        })?;

        Ok(ProxyConfig {
            url: self.url.clone(),
            port: instance.port,
        })
    }

    /// Describe this service as an extension dependency.
    pub fn to_extension(&self) -> Result<ExtensionConfig> {
        let instance = self
            .controllers
            .first()
            .and_then(ControllerConfig::first_instance)
            .ok_or_else(|| {
                Error::config(format!("extension '{}' has no controller instance", self.url))
            })?;

        Ok(ExtensionConfig {
            url: self.url.clone(),
            port: instance.port,
        })
    }
}

impl ControllerConfig {
    pub fn new(controller_type: ControllerType, name: impl Into<String>) -> Self {
        Self {
            controller_type,
            name: name.into(),
            instances: Vec::new(),
        }
    }

    pub fn first_instance(&self) -> Option<&ControllerInstance> {
        self.instances.first()
    }
}
