//! Execution context for dependency services.
//!
//! Proxies and extensions are other services identified by URL. The context
//! knows where their binaries and persisted configurations live, how to have
//! a dependency generate its configuration, and how to read and rewrite it.
//! All calls are synchronous; they only run during orchestrator preparation.

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

const CONFIG_ENV: &str = "SERVICEKIT_CONFIG";
const NAME_ENV: &str = "SERVICEKIT_NAME";
const CONTEXT_DIR_ENV: &str = "SERVICEKIT_CONTEXT_DIR";

/// Access to the configuration of dependency services.
pub trait DependencyContext: Send + Sync {
    /// Make the context ready (directories, secret store, fetch mechanism).
    fn prepare(&self) -> Result<()>;

    /// Ensure the dependency at `url` has a persisted configuration.
    fn prepare_configuration(&self, url: &str) -> Result<()>;

    fn read_service_configuration(&self, url: &str) -> Result<ServiceConfig>;

    fn write_service_configuration(&self, url: &str, config: &ServiceConfig) -> Result<()>;
}

/// Local development context rooted at one directory:
///
/// ```text
/// <root>/bin/<slug>          dependency executables
/// <root>/configs/<slug>.yml  dependency configurations
/// ```
#[derive(Debug, Clone)]
pub struct DevContext {
    root: PathBuf,
}

impl DevContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("configs")
    }

    pub fn bin_path(&self, url: &str) -> PathBuf {
        self.bin_dir().join(slug(url))
    }

    pub fn config_path(&self, url: &str) -> PathBuf {
        self.config_dir().join(format!("{}.yml", slug(url)))
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

/// File-system safe name of a dependency URL.
pub fn slug(url: &str) -> String {
    url.replace(['/', ':', '\\'], "_")
}

impl DependencyContext for DevContext {
    fn prepare(&self) -> Result<()> {
        for dir in [self.bin_dir(), self.config_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::config(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        debug!(root = %self.root.display(), "dev context prepared");
        Ok(())
    }

    fn prepare_configuration(&self, url: &str) -> Result<()> {
        let root = absolute(&self.root)?;
        let context = DevContext::new(&root);
        let config_path = context.config_path(url);
        if config_path.exists() {
            return Ok(());
        }

        let bin_path = context.bin_path(url);
        if !bin_path.exists() {
            return Err(Error::config(format!(
                "dependency '{}' not installed: missing {}",
                url,
                bin_path.display()
            )));
        }

        // the dependency resolves its own identity, never the caller's
        info!(url, bin = %bin_path.display(), "building dependency configuration");
        let output = Command::new(&bin_path)
            .current_dir(context.bin_dir())
            .env_remove(CONFIG_ENV)
            .env_remove(NAME_ENV)
            .env_remove(CONTEXT_DIR_ENV)
            .arg("--build-configuration")
            .arg("--path")
            .arg(&config_path)
            .arg("--url")
            .arg(url)
            .arg("--config")
            .arg(&config_path)
            .arg("--context-dir")
            .arg(&root)
            .output()
            .map_err(|e| Error::config(format!("failed to run '{}': {}", bin_path.display(), e)))?;

        if !output.status.success() {
            return Err(Error::config(format!(
                "dependency '{}' failed to build its configuration ({}): {}",
                url,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !config_path.exists() {
            return Err(Error::config(format!(
                "dependency '{}' did not write {}",
                url,
                config_path.display()
            )));
        }
        Ok(())
    }

    fn read_service_configuration(&self, url: &str) -> Result<ServiceConfig> {
        ServiceConfig::read_optional(&self.config_path(url))?.ok_or_else(|| {
            Error::config(format!("dependency '{}' has no configuration", url))
        })
    }

    fn write_service_configuration(&self, url: &str, config: &ServiceConfig) -> Result<()> {
        config.write(&self.config_path(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceType;
    use tempfile::tempdir;

    #[test]
    fn test_slug() {
        assert_eq!(
            slug("github.com/example/proxy:v1"),
            "github.com_example_proxy_v1"
        );
        assert_eq!(slug(r"C:\deps\proxy"), "C__deps_proxy");
    }

    #[test]
    fn test_prepare_creates_layout() {
        let dir = tempdir().unwrap();
        let context = DevContext::new(dir.path().join("ctx"));
        context.prepare().unwrap();
        assert!(context.bin_dir().is_dir());
        assert!(context.config_dir().is_dir());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let context = DevContext::new(dir.path());
        let url = "github.com/example/proxy";
        assert!(matches!(
            context.read_service_configuration(url),
            Err(Error::Configuration(_))
        ));

        let config = ServiceConfig::new(ServiceType::new("PROXY"), url, "proxy 1");
        context.write_service_configuration(url, &config).unwrap();
        assert_eq!(context.read_service_configuration(url).unwrap(), config);

        // already present: nothing to build
        context.prepare_configuration(url).unwrap();
    }

    #[test]
    fn test_missing_binary() {
        let dir = tempdir().unwrap();
        let context = DevContext::new(dir.path());
        context.prepare().unwrap();

        let err = context
            .prepare_configuration("github.com/example/absent")
            .unwrap_err();
        assert!(err.to_string().contains("github.com/example/absent"));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_build_configuration() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let context = DevContext::new(dir.path());
        context.prepare().unwrap();

        let url = "github.com/example/proxy";
        let bin = context.bin_path(url);
        std::fs::write(
            &bin,
            "#!/bin/sh\nprintf 'type: PROXY\\nurl: %s\\ninstance_name: proxy 1\\n' \"$5\" > \"$3\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        context.prepare_configuration(url).unwrap();
        let config = context.read_service_configuration(url).unwrap();
        assert_eq!(config.url, url);
        assert_eq!(config.service_type, ServiceType::new("PROXY"));
    }
}
