//! Shared fixtures for orchestrator and broadcaster integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use servicekit::config::{
    ControllerConfig, ControllerInstance, ExtensionConfig, ServiceConfig, DESTINATION_NAME,
    SOURCE_NAME,
};
use servicekit::{Controller, ControllerType, DependencyContext, Error, Result, ServiceType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory dependency context. Clones share state, so a test can keep a
/// handle after giving one to the orchestrator.
#[derive(Clone, Default)]
pub struct MemoryContext {
    configs: Arc<Mutex<HashMap<String, ServiceConfig>>>,
    prepares: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: ServiceConfig) {
        self.configs.lock().insert(config.url.clone(), config);
    }

    pub fn get(&self, url: &str) -> Option<ServiceConfig> {
        self.configs.lock().get(url).cloned()
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl DependencyContext for MemoryContext {
    fn prepare(&self) -> Result<()> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prepare_configuration(&self, url: &str) -> Result<()> {
        if self.configs.lock().contains_key(url) {
            Ok(())
        } else {
            Err(Error::Configuration(format!("dependency '{}' unavailable", url)))
        }
    }

    fn read_service_configuration(&self, url: &str) -> Result<ServiceConfig> {
        self.get(url)
            .ok_or_else(|| Error::Configuration(format!("dependency '{}' has no configuration", url)))
    }

    fn write_service_configuration(&self, url: &str, config: &ServiceConfig) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().insert(url.to_owned(), config.clone());
        Ok(())
    }
}

/// What a `FakeController` received during wiring.
#[derive(Default)]
pub struct Wired {
    pub config: Option<ControllerConfig>,
    pub extensions: Vec<ExtensionConfig>,
}

/// Controller with a scripted run outcome.
pub struct FakeController {
    kind: ControllerType,
    extensions: Vec<String>,
    fail_with: Option<String>,
    panics: bool,
    pub wired: Arc<Mutex<Wired>>,
}

impl FakeController {
    pub fn new(kind: ControllerType) -> Self {
        Self {
            kind,
            extensions: Vec::new(),
            fail_with: None,
            panics: false,
            wired: Arc::default(),
        }
    }

    pub fn requiring(mut self, url: &str) -> Self {
        self.extensions.push(url.to_owned());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.fail_with = Some(reason.to_owned());
        self
    }
}

#[async_trait]
impl Controller for FakeController {
    fn controller_type(&self) -> ControllerType {
        self.kind
    }

    fn required_extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn add_config(&mut self, config: ControllerConfig) {
        self.wired.lock().config = Some(config);
    }

    fn add_extension_config(&mut self, extension: ExtensionConfig) {
        self.wired.lock().extensions.push(extension);
    }

    async fn run(&self) -> Result<()> {
        if self.panics {
            panic!("controller crashed");
        }
        match self.fail_with {
            Some(ref reason) => Err(Error::Network {
                endpoint: "tcp://*:0".into(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

pub fn controller(kind: ControllerType, name: &str, port: u64) -> ControllerConfig {
    let mut config = ControllerConfig::new(kind, name);
    config.instances.push(ControllerInstance {
        name: name.to_owned(),
        instance: format!("{}1", name),
        port,
    });
    config
}

/// A proxy service listening on `source_port` and forwarding to
/// `destination_port`.
pub fn proxy(url: &str, source_port: u64, destination_port: u64) -> ServiceConfig {
    let mut config = ServiceConfig::new(ServiceType::new("PROXY"), url, "proxy 1");
    config.set_controller(controller(ControllerType::Replier, SOURCE_NAME, source_port));
    config.set_controller(controller(ControllerType::Replier, DESTINATION_NAME, destination_port));
    config
}

/// An extension service answering on `port`.
pub fn extension(url: &str, port: u64) -> ServiceConfig {
    let mut config = ServiceConfig::new(ServiceType::new("DB"), url, "db 1");
    config.set_controller(controller(ControllerType::Replier, "main", port));
    config
}
