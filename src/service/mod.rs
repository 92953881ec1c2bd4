//! Service addressing and identity.
//!
//! A `ServiceType` plus an `AddressingMode` resolves into a `Service`: the
//! concrete reply and/or broadcast endpoints, and for secured modes the CURVE
//! key material. Settings come from `AppConfig` using the convention:
//!
//! | Key | Used by |
//! |---|---|
//! | `<NAME>_HOST`, `<NAME>_PORT` | `Remote` (host + port), `This` (port) |
//! | `<NAME>_BROADCAST_HOST`, `<NAME>_BROADCAST_PORT` | `Subscribe` (host + port), `Broadcast` (port) |
//! | `<NAME>_PUBLIC_KEY` | secured `Remote` |
//! | `<NAME>_BROADCAST_PUBLIC_KEY` | secured `Subscribe` |
//!
//! Secured `This` and `Broadcast` fetch a keypair from the `SecretStore`.

pub mod credentials;

pub use credentials::{Credentials, FileSecretStore, MemorySecretStore, SecretStore};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Bucket in the secret store holding service keypairs.
pub const SECRET_BUCKET: &str = "services";

/// Identifier of a kind of service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceType(String);

impl ServiceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-cased name used as the environment variable prefix.
    pub fn env_prefix(&self) -> String {
        self.0.to_uppercase()
    }

    /// Location of the reply-side keypair in the secret store.
    pub fn secret_key_path(&self) -> (&'static str, String) {
        (SECRET_BUCKET, format!("{}_secret_key", self.0.to_lowercase()))
    }

    /// Location of the broadcast-side keypair in the secret store.
    pub fn broadcast_secret_key_path(&self) -> (&'static str, String) {
        (
            SECRET_BUCKET,
            format!("{}_broadcast_secret_key", self.0.to_lowercase()),
        )
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// How the endpoints of a `Service` are constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    /// In-process transport, both endpoints, never secured.
    InProcess,
    /// Connect to another process's reply endpoint.
    Remote,
    /// Bind our own reply endpoint on all interfaces.
    This,
    /// Connect to another process's broadcaster.
    Subscribe,
    /// Bind our own broadcaster on all interfaces.
    Broadcast,
}

impl AddressingMode {
    pub fn has_reply_endpoint(&self) -> bool {
        matches!(
            self,
            AddressingMode::InProcess | AddressingMode::Remote | AddressingMode::This
        )
    }

    pub fn has_broadcast_endpoint(&self) -> bool {
        matches!(
            self,
            AddressingMode::InProcess | AddressingMode::Subscribe | AddressingMode::Broadcast
        )
    }
}

/// Resolved endpoints and credentials of one service.
///
/// Created once at bootstrap and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    name: String,
    mode: AddressingMode,
    reply_endpoint: Option<String>,
    broadcast_endpoint: Option<String>,
    credentials: Option<Credentials>,
}

impl Service {
    /// In-process endpoints derived from the service name.
    pub fn inprocess(service_type: &ServiceType) -> Self {
        let name = service_type.as_str().to_owned();
        Self {
            reply_endpoint: Some(format!("inproc://reply_{name}")),
            broadcast_endpoint: Some(format!("inproc://pub_{name}")),
            name,
            mode: AddressingMode::InProcess,
            credentials: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AddressingMode {
        self.mode
    }

    pub fn reply_endpoint(&self) -> Option<&str> {
        self.reply_endpoint.as_deref()
    }

    pub fn broadcast_endpoint(&self) -> Option<&str> {
        self.broadcast_endpoint.as_deref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_secure(&self) -> bool {
        self.credentials.is_some()
    }

    /// Port of the reply endpoint; `None` for in-process endpoints.
    pub fn port(&self) -> Option<u16> {
        self.reply_endpoint.as_deref().and_then(tcp_port)
    }

    /// Port of the broadcast endpoint; `None` for in-process endpoints.
    pub fn broadcast_port(&self) -> Option<u16> {
        self.broadcast_endpoint.as_deref().and_then(tcp_port)
    }

    /// CURVE authentication domain scoping broadcast subscribers.
    pub fn broadcast_domain(&self) -> String {
        format!("{}_broadcast", self.name)
    }
}

fn tcp_port(endpoint: &str) -> Option<u16> {
    endpoint
        .strip_prefix("tcp://")?
        .rsplit_once(':')?
        .1
        .parse()
        .ok()
}

/// Resolves `ServiceType` + `AddressingMode` into a `Service`.
#[derive(Clone)]
pub struct ServiceIdentity {
    config: Arc<AppConfig>,
    secrets: Arc<dyn SecretStore>,
}

impl ServiceIdentity {
    pub fn new(config: Arc<AppConfig>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { config, secrets }
    }

    /// Resolve endpoints without credentials.
    pub fn resolve(&self, service_type: &ServiceType, mode: AddressingMode) -> Result<Service> {
        let prefix = service_type.env_prefix();
        let mut service = Service {
            name: service_type.as_str().to_owned(),
            mode,
            reply_endpoint: None,
            broadcast_endpoint: None,
            credentials: None,
        };

        match mode {
            AddressingMode::InProcess => return Ok(Service::inprocess(service_type)),
            AddressingMode::Remote => {
                let host = self.config.require(&format!("{prefix}_HOST"))?;
                let port = self.require_port(&format!("{prefix}_PORT"))?;
                service.reply_endpoint = Some(format!("tcp://{host}:{port}"));
            }
            AddressingMode::This => {
                let port = self.require_port(&format!("{prefix}_PORT"))?;
                service.reply_endpoint = Some(format!("tcp://*:{port}"));
            }
            AddressingMode::Subscribe => {
                let host = self.config.require(&format!("{prefix}_BROADCAST_HOST"))?;
                let port = self.require_port(&format!("{prefix}_BROADCAST_PORT"))?;
                service.broadcast_endpoint = Some(format!("tcp://{host}:{port}"));
            }
            AddressingMode::Broadcast => {
                let port = self.require_port(&format!("{prefix}_BROADCAST_PORT"))?;
                service.broadcast_endpoint = Some(format!("tcp://*:{port}"));
            }
        }

        Ok(service)
    }

    /// Resolve endpoints and attach the credentials the mode requires.
    ///
    /// `InProcess` never carries credentials.
    pub fn resolve_secure(
        &self,
        service_type: &ServiceType,
        mode: AddressingMode,
    ) -> Result<Service> {
        let mut service = self.resolve(service_type, mode)?;
        let prefix = service_type.env_prefix();

        service.credentials = match mode {
            AddressingMode::InProcess => None,
            AddressingMode::Remote => Some(self.public_key(service_type, &format!("{prefix}_PUBLIC_KEY"))?),
            AddressingMode::Subscribe => {
                Some(self.public_key(service_type, &format!("{prefix}_BROADCAST_PUBLIC_KEY"))?)
            }
            AddressingMode::This => {
                let (bucket, key) = service_type.secret_key_path();
                Some(self.fetch_secret(service_type, bucket, &key)?)
            }
            AddressingMode::Broadcast => {
                let (bucket, key) = service_type.broadcast_secret_key_path();
                Some(self.fetch_secret(service_type, bucket, &key)?)
            }
        };

        Ok(service)
    }

    fn require_port(&self, key: &str) -> Result<u16> {
        let raw = self.config.require(key)?;
        raw.trim()
            .parse()
            .map_err(|_| Error::config(format!("'{}' is not a valid port: {}", key, raw)))
    }

    fn public_key(&self, service_type: &ServiceType, key: &str) -> Result<Credentials> {
        let value = self.config.get_string(key).filter(|v| !v.is_empty()).ok_or_else(|| {
            Error::auth(format!(
                "security enabled for {}, but '{}' is missing",
                service_type, key
            ))
        })?;
        Credentials::public(value)
    }

    fn fetch_secret(
        &self,
        service_type: &ServiceType,
        bucket: &str,
        key: &str,
    ) -> Result<Credentials> {
        self.secrets.key_pair(bucket, key).map_err(|e| {
            Error::auth(format!("secret key for {} service: {}", service_type, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::credentials::tests::{CLIENT_PUBLIC, SERVER_PUBLIC, SERVER_SECRET};
    use super::*;

    fn identity(pairs: &[(&str, &str)]) -> (ServiceIdentity, Arc<MemorySecretStore>) {
        let config = AppConfig::from_pairs(pairs.iter().copied()).unwrap();
        let secrets = Arc::new(MemorySecretStore::new());
        (
            ServiceIdentity::new(Arc::new(config), secrets.clone()),
            secrets,
        )
    }

    #[test]
    fn test_inprocess_endpoints() {
        let (identity, _) = identity(&[]);
        let service = identity
            .resolve_secure(&"categorizer".into(), AddressingMode::InProcess)
            .unwrap();

        assert_eq!(service.reply_endpoint(), Some("inproc://reply_categorizer"));
        assert_eq!(service.broadcast_endpoint(), Some("inproc://pub_categorizer"));
        assert!(service.credentials().is_none());
        assert_eq!(service.port(), None);
    }

    #[test]
    fn test_remote_endpoint() {
        let (identity, _) = identity(&[("WORKER_HOST", "127.0.0.1"), ("WORKER_PORT", "5000")]);
        let service = identity
            .resolve(&"worker".into(), AddressingMode::Remote)
            .unwrap();

        assert_eq!(service.reply_endpoint(), Some("tcp://127.0.0.1:5000"));
        assert_eq!(service.broadcast_endpoint(), None);
        assert_eq!(service.port(), Some(5000));
    }

    #[test]
    fn test_this_binds_all_interfaces() {
        let (identity, _) = identity(&[("WORKER_PORT", "5001")]);
        let service = identity.resolve(&"worker".into(), AddressingMode::This).unwrap();
        assert_eq!(service.reply_endpoint(), Some("tcp://*:5001"));
    }

    #[test]
    fn test_subscribe_and_broadcast() {
        let (identity, _) = identity(&[
            ("WORKER_BROADCAST_HOST", "10.0.0.2"),
            ("WORKER_BROADCAST_PORT", "5555"),
        ]);
        let sub = identity
            .resolve(&"worker".into(), AddressingMode::Subscribe)
            .unwrap();
        let publisher = identity
            .resolve(&"worker".into(), AddressingMode::Broadcast)
            .unwrap();

        assert_eq!(sub.broadcast_endpoint(), Some("tcp://10.0.0.2:5555"));
        assert_eq!(sub.reply_endpoint(), None);
        assert_eq!(publisher.broadcast_endpoint(), Some("tcp://*:5555"));
        assert_eq!(publisher.broadcast_port(), Some(5555));
        assert_eq!(publisher.broadcast_domain(), "worker_broadcast");
    }

    #[test]
    fn test_missing_variable_is_configuration_error() {
        let (identity, _) = identity(&[("WORKER_HOST", "127.0.0.1")]);
        let err = identity
            .resolve(&"worker".into(), AddressingMode::Remote)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_port() {
        let (identity, _) = identity(&[("WORKER_PORT", "http")]);
        assert!(matches!(
            identity.resolve(&"worker".into(), AddressingMode::This),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_secure_remote_requires_public_key() {
        let (identity, _) = identity(&[("WORKER_HOST", "127.0.0.1"), ("WORKER_PORT", "5000")]);
        let err = identity
            .resolve_secure(&"worker".into(), AddressingMode::Remote)
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));

        let (identity, _) = identity_with_key();
        let service = identity
            .resolve_secure(&"worker".into(), AddressingMode::Remote)
            .unwrap();
        assert_eq!(
            service.credentials(),
            Some(&Credentials::PublicKey(CLIENT_PUBLIC.into()))
        );
    }

    fn identity_with_key() -> (ServiceIdentity, Arc<MemorySecretStore>) {
        identity(&[
            ("WORKER_HOST", "127.0.0.1"),
            ("WORKER_PORT", "5000"),
            ("WORKER_PUBLIC_KEY", CLIENT_PUBLIC),
        ])
    }

    #[test]
    fn test_secure_broadcast_fetches_secret() {
        let (identity, secrets) = identity(&[("WORKER_BROADCAST_PORT", "5555")]);
        assert!(matches!(
            identity.resolve_secure(&"worker".into(), AddressingMode::Broadcast),
            Err(Error::Auth(_))
        ));

        let (bucket, key) = ServiceType::new("worker").broadcast_secret_key_path();
        secrets.insert(
            bucket,
            &key,
            Credentials::key_pair(SERVER_PUBLIC, SERVER_SECRET).unwrap(),
        );
        let service = identity
            .resolve_secure(&"worker".into(), AddressingMode::Broadcast)
            .unwrap();
        assert_eq!(service.credentials().unwrap().secret_key(), Some(SERVER_SECRET));
    }

    #[test]
    fn test_exactly_one_endpoint_outside_inprocess() {
        let (identity, _) = identity(&[
            ("WORKER_HOST", "127.0.0.1"),
            ("WORKER_PORT", "5000"),
            ("WORKER_BROADCAST_HOST", "127.0.0.1"),
            ("WORKER_BROADCAST_PORT", "5555"),
        ]);
        for mode in [
            AddressingMode::Remote,
            AddressingMode::This,
            AddressingMode::Subscribe,
            AddressingMode::Broadcast,
        ] {
            let service = identity.resolve(&"worker".into(), mode).unwrap();
            assert_eq!(service.reply_endpoint().is_some(), mode.has_reply_endpoint());
            assert_eq!(
                service.broadcast_endpoint().is_some(),
                mode.has_broadcast_endpoint()
            );
        }
    }
}
