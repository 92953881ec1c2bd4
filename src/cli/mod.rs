//! Command-line interface.
//!
//! A service binary runs its controllers by default. With
//! `--build-configuration --path <file> --url <url>` it only writes its
//! resolved configuration and exits, which is how a dependent service has it
//! generate a configuration on first use.

use clap::{Args, Parser};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Write the service configuration to --path and exit
    #[arg(long = "build-configuration", requires_all = ["path", "url"])]
    pub build_configuration: bool,

    /// Destination of the generated configuration
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// URL this service is known by to its dependents
    #[arg(long)]
    pub url: Option<String>,

    /// Persisted service configuration
    #[arg(long, env = "SERVICEKIT_CONFIG", default_value = "service.yml")]
    pub config: PathBuf,

    /// Root of dependency binaries, configurations and secrets
    #[arg(long = "context-dir", env = "SERVICEKIT_CONTEXT_DIR", default_value = ".servicekit")]
    pub context_dir: PathBuf,

    /// Service name; also the environment variable prefix
    #[arg(long, env = "SERVICEKIT_NAME", default_value = "servicekit")]
    pub name: String,

    /// Enable CURVE on the reply and broadcast endpoints
    #[arg(long)]
    pub secure: bool,

    /// Public key allowed to subscribe to the broadcaster (repeatable)
    #[arg(long = "allow", value_name = "Z85_KEY")]
    pub allow: Vec<String>,

    /// Proxy to sit behind; piped to the main controller (repeatable)
    #[arg(long = "proxy", value_name = "URL")]
    pub proxies: Vec<String>,

    /// Extension service the main controller uses (repeatable)
    #[arg(long = "extension", value_name = "URL")]
    pub extensions: Vec<String>,

    #[command(flatten)]
    pub logging: LoggingConfig,
}

impl Cli {
    /// `(path, url)` when running in build-configuration mode.
    pub fn build_target(&self) -> Option<(&Path, &str)> {
        if !self.build_configuration {
            return None;
        }
        Some((self.path.as_deref()?, self.url.as_deref()?))
    }
}

/// Logging configuration that can be set via CLI or env vars
#[derive(Debug, Clone, Default, Args)]
pub struct LoggingConfig {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", env = "SERVICEKIT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log filter directives
    #[arg(long = "log-filter", env = "SERVICEKIT_LOG_FILTER")]
    pub log_filter: Option<String>,
}

impl LoggingConfig {
    pub fn get_effective_level(&self) -> &str {
        match (self.verbose, self.log_level.as_deref()) {
            (v, _) if v >= 2 => "trace",
            (1, _) => "debug",
            (0, Some(level)) => level,
            _ => "info",
        }
    }
}
