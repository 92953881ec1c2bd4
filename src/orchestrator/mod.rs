//! Service orchestration.
//!
//! An `Orchestrator` owns the controllers of one service together with the
//! proxies and pipelines it depends on. `prepare` runs the startup stages
//! strictly in order and stops at the first failure, before any controller
//! has started:
//!
//! 1. context: make the dependency context ready
//! 2. service config: synthesize it, or check its type
//! 3. controller configs: one entry and one valid TCP port per controller
//! 4. proxies: fetch each proxy's config and check it against ours
//! 5. pipelines: point each proxy's destination at our controller port
//! 6. extensions: fetch and check every controller's extensions
//! 7. wire: hand every controller its config and extension configs
//!
//! `run` is the last stage: every controller on its own task, and the first
//! controller failure ends the service.

use crate::config::{
    ControllerConfig, ControllerInstance, ExtensionConfig, ServiceConfig, DESTINATION_NAME,
};
use crate::context::DependencyContext;
use crate::controller::{Controller, ControllerType};
use crate::error::{Error, Result};
use crate::service::ServiceType;
use std::collections::{BTreeMap, HashMap};
use std::net::TcpListener;
use std::path::Path;
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

pub struct Orchestrator {
    name: String,
    service: Option<ServiceConfig>,
    context: Box<dyn DependencyContext>,
    controllers: BTreeMap<String, Box<dyn Controller>>,
    required_proxies: Vec<String>,
    pipelines: BTreeMap<String, String>,
    prepared: bool,
}

impl Orchestrator {
    /// `service` is the persisted configuration, if one exists yet.
    pub fn new(
        name: impl Into<String>,
        context: Box<dyn DependencyContext>,
        service: Option<ServiceConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            service,
            context,
            controllers: BTreeMap::new(),
            required_proxies: Vec::new(),
            pipelines: BTreeMap::new(),
            prepared: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a controller under `name`, replacing any previous one.
    pub fn add_controller<C>(&mut self, name: impl Into<String>, controller: C)
    where
        C: Controller + 'static,
    {
        self.controllers.insert(name.into(), Box::new(controller));
    }

    /// Declare a proxy this service sits behind.
    pub fn require_proxy(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !self.required_proxies.contains(&url) {
            self.required_proxies.push(url);
        }
    }

    /// Bind a required proxy to a registered controller.
    pub fn pipe(&mut self, proxy_url: &str, name: &str) -> Result<()> {
        if !self.required_proxies.iter().any(|url| url == proxy_url) {
            return Err(Error::config(format!(
                "proxy '{}' not required, call require_proxy first",
                proxy_url
            )));
        }
        if !self.controllers.contains_key(name) {
            return Err(Error::config(format!(
                "controller '{}' not added, call add_controller first",
                name
            )));
        }

        self.pipelines.insert(proxy_url.to_owned(), name.to_owned());
        Ok(())
    }

    pub fn required_proxies(&self) -> &[String] {
        &self.required_proxies
    }

    pub fn pipelines(&self) -> &BTreeMap<String, String> {
        &self.pipelines
    }

    /// The service configuration; complete once `prepare` succeeded.
    pub fn service_config(&self) -> Option<&ServiceConfig> {
        self.service.as_ref()
    }

    /// Validate and reconcile configuration, then wire the controllers.
    pub fn prepare(&mut self, expected: &ServiceType) -> Result<()> {
        if self.controllers.is_empty() {
            return Err(Error::config("no controllers, call add_controller first"));
        }

        self.context.prepare()?;
        self.prepare_service_config(expected)?;
        self.prepare_controller_configs()?;

        if !self.required_proxies.is_empty() {
            info!(proxies = ?self.required_proxies, "preparing proxies");
            for url in self.required_proxies.clone() {
                self.prepare_proxy(&url)?;
            }

            if self.pipelines.is_empty() {
                return Err(Error::config("no pipeline links the proxies to a controller"));
            }
            for (url, name) in self.pipelines.clone() {
                self.lint_pipeline(&url, &name)?;
            }
        }

        let extensions = self.required_extensions();
        if !extensions.is_empty() {
            info!(?extensions, "preparing extensions");
            for url in &extensions {
                self.prepare_extension(url)?;
            }
        }

        self.wire()?;
        self.prepared = true;
        info!(service = %self.name, controllers = self.controllers.len(), "service prepared");
        Ok(())
    }

    /// Write the prepared configuration to `path` under `url`.
    pub fn build_configuration(&self, path: &Path, url: &str) -> Result<()> {
        let mut service = self.service()?.clone();
        service.url = url.to_owned();
        service.write(path)?;
        info!(path = %path.display(), url, "service configuration written");
        Ok(())
    }

    /// Run every controller concurrently until all of them finish.
    ///
    /// The first controller error aborts the others and is returned as
    /// `Error::ControllerFailed`.
    pub async fn run(self) -> Result<()> {
        if !self.prepared {
            return Err(Error::config("run called before prepare"));
        }

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for (name, controller) in self.controllers {
            info!(controller = %name, kind = %controller.controller_type(), "starting controller");
            let handle = tasks.spawn(async move { controller.run().await });
            names.insert(handle.id(), name);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, Ok(()))) => {
                    debug!(controller = %task_name(&names, id), "controller finished")
                }
                Ok((id, Err(e))) => {
                    return Err(Error::ControllerFailed {
                        name: task_name(&names, id),
                        source: Box::new(e),
                    })
                }
                Err(e) => {
                    return Err(Error::ControllerFailed {
                        name: task_name(&names, e.id()),
                        source: Box::new(Error::TaskAborted(e.to_string())),
                    })
                }
            }
        }
        Ok(())
    }

    fn service(&self) -> Result<&ServiceConfig> {
        self.service
            .as_ref()
            .ok_or_else(|| Error::config("service configuration not prepared"))
    }

    fn service_mut(&mut self) -> Result<&mut ServiceConfig> {
        self.service
            .as_mut()
            .ok_or_else(|| Error::config("service configuration not prepared"))
    }

    fn prepare_service_config(&mut self, expected: &ServiceType) -> Result<()> {
        if let Some(ref service) = self.service {
            if service.service_type != *expected {
                return Err(Error::config(format!(
                    "service type is overwritten, expected '{}' not '{}'",
                    expected, service.service_type
                )));
            }
            return Ok(());
        }

        let exe = std::env::current_exe()
            .map_err(|e| Error::config(format!("failed to get current executable path: {}", e)))?;
        let service = ServiceConfig::new(
            expected.clone(),
            exe.display().to_string(),
            format!("{} 1", self.name),
        );
        debug!(url = %service.url, "synthesized service configuration");
        self.service = Some(service);
        Ok(())
    }

    fn prepare_controller_configs(&mut self) -> Result<()> {
        let declared: Vec<(String, ControllerType)> = self
            .controllers
            .iter()
            .map(|(name, controller)| (name.clone(), controller.controller_type()))
            .collect();

        for (name, kind) in declared {
            self.prepare_controller_config(&name, kind)?;
        }
        Ok(())
    }

    fn prepare_controller_config(&mut self, name: &str, kind: ControllerType) -> Result<()> {
        let service = self.service_mut()?;
        let mut config = match service.controller(name) {
            Some(existing) if existing.controller_type != kind => {
                return Err(Error::config(format!(
                    "controller '{}' expected to be of '{}' type, not '{}'",
                    name, kind, existing.controller_type
                )))
            }
            Some(existing) => existing.clone(),
            None => ControllerConfig::new(kind, name),
        };

        match config.first_instance() {
            Some(instance) if instance.port == 0 || instance.port > u64::from(u16::MAX) => {
                return Err(Error::config(format!(
                    "controller '{}' instance '{}' has invalid port {}",
                    name, instance.instance, instance.port
                )))
            }
            Some(_) => {}
            None => {
                let port = free_port()?;
                debug!(controller = name, port, "allocated controller port");
                config.instances.push(ControllerInstance {
                    name: name.to_owned(),
                    instance: format!("{}1", name),
                    port: u64::from(port),
                });
            }
        }

        service.set_controller(config);
        Ok(())
    }

    fn prepare_proxy(&mut self, url: &str) -> Result<()> {
        self.context.prepare_configuration(url)?;
        let fresh = self.context.read_service_configuration(url)?.to_proxy()?;

        let service = self.service_mut()?;
        match service.proxy(url) {
            None => service.set_proxy(fresh),
            Some(local) => check_dependency(local.url.as_str(), local.port, &fresh.url, fresh.port, url)?,
        }
        Ok(())
    }

    fn lint_pipeline(&mut self, url: &str, name: &str) -> Result<()> {
        let mut proxy = self.context.read_service_configuration(url)?;
        let mut destination = proxy
            .controller(DESTINATION_NAME)
            .cloned()
            .ok_or_else(|| {
                Error::config(format!("proxy '{}' has no '{}' controller", url, DESTINATION_NAME))
            })?;

        let port = self
            .service()?
            .controller(name)
            .and_then(ControllerConfig::first_instance)
            .map(|instance| instance.port)
            .ok_or_else(|| Error::config(format!("controller '{}' has no instance", name)))?;

        let Some(instance) = destination.instances.first_mut() else {
            return Err(Error::config(format!(
                "proxy '{}' destination has no instances",
                url
            )));
        };
        if instance.port == port {
            debug!(proxy = url, controller = name, port, "pipeline consistent");
            return Ok(());
        }

        info!(
            proxy = url,
            destination_port = instance.port,
            controller_port = port,
            "proxy destination does not match the controller"
        );
        instance.port = port;
        proxy.set_controller(destination);
        self.context.write_service_configuration(url, &proxy)?;
        warn!(
            proxy = url,
            port,
            "proxy destination port rewritten; the proxy must be restarted to pick it up"
        );
        Ok(())
    }

    fn required_extensions(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for controller in self.controllers.values() {
            for url in controller.required_extensions() {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
        urls
    }

    fn prepare_extension(&mut self, url: &str) -> Result<()> {
        self.context.prepare_configuration(url)?;
        let fresh = self.context.read_service_configuration(url)?.to_extension()?;

        let service = self.service_mut()?;
        match service.extension(url) {
            None => service.set_extension(fresh),
            Some(local) => check_dependency(local.url.as_str(), local.port, &fresh.url, fresh.port, url)?,
        }
        Ok(())
    }

    fn wire(&mut self) -> Result<()> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| Error::config("service configuration not prepared"))?;

        for (name, controller) in self.controllers.iter_mut() {
            let config = service.controller(name).cloned().ok_or_else(|| {
                Error::config(format!("controller '{}' registered but not configured", name))
            })?;
            controller.add_config(config);

            for url in controller.required_extensions() {
                let extension: ExtensionConfig = service.extension(&url).cloned().ok_or_else(|| {
                    Error::config(format!("extension '{}' of '{}' not configured", url, name))
                })?;
                controller.add_extension_config(extension);
            }
        }
        Ok(())
    }
}

fn check_dependency(
    local_url: &str,
    local_port: u64,
    fresh_url: &str,
    fresh_port: u64,
    url: &str,
) -> Result<()> {
    if local_url != fresh_url {
        return Err(Error::mismatch(
            url,
            format!("url '{}' in local configuration, '{}' in the dependency", local_url, fresh_url),
        ));
    }
    if local_port != fresh_port {
        return Err(Error::mismatch(
            url,
            format!("port {} in local configuration, {} in the dependency", local_port, fresh_port),
        ));
    }
    Ok(())
}

fn task_name(names: &HashMap<Id, String>, id: Id) -> String {
    names
        .get(&id)
        .cloned()
        .unwrap_or_else(|| format!("task {}", id))
}

/// Ask the OS for a currently unused TCP port.
fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| Error::PortAllocation(format!("no free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::PortAllocation(format!("no free port: {}", e)))?
        .port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_port_is_nonzero() {
        assert_ne!(free_port().unwrap(), 0);
    }

    #[test]
    fn test_check_dependency() {
        assert!(check_dependency("a", 1, "a", 1, "a").is_ok());
        assert!(matches!(
            check_dependency("a", 1, "a", 2, "a"),
            Err(Error::DependencyMismatch { .. })
        ));
        assert!(matches!(
            check_dependency("a", 1, "b", 1, "a"),
            Err(Error::DependencyMismatch { .. })
        ));
    }
}
