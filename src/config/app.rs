//! Layered application settings.
//!
//! Settings are loaded in order of precedence, later sources overriding
//! earlier ones:
//! 1. Defaults supplied by the caller
//! 2. Process environment variables
//!
//! Keys are case-insensitive, so `CATEGORIZER_HOST` in the environment is
//! found by `get_string("categorizer_host")` and vice versa.

use crate::error::{Error, Result};
use config::{Config, Environment};

/// Flat key/value configuration backed by the `config` crate.
#[derive(Debug, Clone)]
pub struct AppConfig {
    inner: Config,
}

impl AppConfig {
    /// Load settings from the process environment only.
    pub fn from_env() -> Result<Self> {
        Self::with_defaults(std::iter::empty::<(String, String)>())
    }

    /// Load settings from the process environment on top of `defaults`.
    pub fn with_defaults<I, K, V>(defaults: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = Config::builder();
        for (key, value) in defaults {
            builder = builder
                .set_default(normalize(key.as_ref()), value.into())
                .map_err(|e| Error::config(format!("invalid default: {}", e)))?;
        }

        let inner = builder
            .add_source(Environment::default())
            .build()
            .map_err(|e| Error::config(format!("failed to load environment: {}", e)))?;

        Ok(Self { inner })
    }

    /// Build settings from explicit pairs without touching the environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder
                .set_override(normalize(key.as_ref()), value.into())
                .map_err(|e| Error::config(format!("invalid setting: {}", e)))?;
        }

        let inner = builder
            .build()
            .map_err(|e| Error::config(format!("failed to build settings: {}", e)))?;

        Ok(Self { inner })
    }

    /// Look up a string value.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.inner.get_string(&normalize(key)).ok()
    }

    /// Whether a non-empty value is set for `key`.
    pub fn exists(&self, key: &str) -> bool {
        self.get_string(key).is_some_and(|v| !v.is_empty())
    }

    /// Look up a value that must be present.
    pub fn require(&self, key: &str) -> Result<String> {
        match self.get_string(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::config(format!("missing '{}'", key.to_uppercase()))),
        }
    }
}

fn normalize(key: &str) -> String {
    key.to_lowercase()
}
