#![cfg(unix)]

use servicekit::config::ServiceConfig;
use servicekit::context::DevContext;
use servicekit::{ControllerType, DependencyContext, ServiceType};
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const BIN: &str = env!("CARGO_BIN_EXE_servicekit");
const URL: &str = "github.com/example/replier";

fn assert_built(config: &ServiceConfig) {
    assert_eq!(config.url, URL);
    assert_eq!(config.service_type, ServiceType::new("SERVICEKIT"));
    let main = config.controller("main").unwrap();
    assert_eq!(main.controller_type, ControllerType::Replier);
    assert_ne!(main.first_instance().unwrap().port, 0);
}

#[test]
fn test_binary_writes_configuration_and_exits() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("replier.yml");

    let output = Command::new(BIN)
        .current_dir(dir.path())
        .env_remove("SERVICEKIT_CONFIG")
        .env_remove("SERVICEKIT_NAME")
        .env_remove("SERVICEKIT_CONTEXT_DIR")
        .args(["--build-configuration", "--url", URL, "--path"])
        .arg(&path)
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_built(&ServiceConfig::read(&path).unwrap());
}

#[test]
fn test_dependency_ignores_caller_configuration() {
    let workdir = tempdir().unwrap();
    let caller = workdir.path().join("service.yml");
    ServiceConfig::new(ServiceType::new("CATEGORIZER"), "/usr/bin/categorizer", "categorizer 1")
        .write(&caller)
        .unwrap();

    std::env::set_current_dir(workdir.path()).unwrap();
    std::env::set_var("SERVICEKIT_CONFIG", &caller);
    std::env::set_var("SERVICEKIT_NAME", "categorizer");

    let context = DevContext::new(Path::new("ctx"));
    context.prepare().unwrap();
    std::fs::copy(BIN, context.bin_path(URL)).unwrap();

    context.prepare_configuration(URL).unwrap();
    assert_built(&context.read_service_configuration(URL).unwrap());

    let untouched = ServiceConfig::read(&caller).unwrap();
    assert_eq!(untouched.service_type, ServiceType::new("CATEGORIZER"));
    assert!(untouched.controllers.is_empty());
}
