//! CURVE key material and the secret stores that supply it.
//!
//! Keys travel as Z85 strings (40 characters, 32 bytes decoded), the format
//! libzmq uses for `ZMQ_CURVE_*` options.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

const Z85_KEY_LEN: usize = 40;

/// Key material attached to a secured `Service`.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A peer's public key (the side connecting to it).
    PublicKey(String),
    /// Our own keypair (the side binding).
    KeyPair {
        public_key: String,
        secret_key: String,
    },
}

impl Credentials {
    /// Wrap a peer's public key after checking it is a valid Z85 key.
    pub fn public(public_key: impl Into<String>) -> Result<Self> {
        let public_key = public_key.into();
        decode_key(&public_key)?;
        Ok(Credentials::PublicKey(public_key))
    }

    pub fn key_pair(public_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let public_key = public_key.into();
        let secret_key = secret_key.into();
        decode_key(&public_key)?;
        decode_key(&secret_key)?;
        Ok(Credentials::KeyPair {
            public_key,
            secret_key,
        })
    }

    pub fn public_key(&self) -> &str {
        match self {
            Credentials::PublicKey(key) => key,
            Credentials::KeyPair { public_key, .. } => public_key,
        }
    }

    pub fn secret_key(&self) -> Option<&str> {
        match self {
            Credentials::PublicKey(_) => None,
            Credentials::KeyPair { secret_key, .. } => Some(secret_key),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::PublicKey(key) => f.debug_tuple("PublicKey").field(key).finish(),
            Credentials::KeyPair { public_key, .. } => f
                .debug_struct("KeyPair")
                .field("public_key", public_key)
                .field("secret_key", &"<redacted>")
                .finish(),
        }
    }
}

/// Decode a Z85 CURVE key into its 32 raw bytes.
pub fn decode_key(key: &str) -> Result<[u8; 32]> {
    if key.len() != Z85_KEY_LEN {
        return Err(Error::auth(format!(
            "curve key must be {} Z85 characters, got {}",
            Z85_KEY_LEN,
            key.len()
        )));
    }
    let bytes = zmq::z85_decode(key).map_err(|_| Error::auth("curve key is not valid Z85"))?;
    bytes
        .try_into()
        .map_err(|_| Error::auth("curve key does not decode to 32 bytes"))
}

/// External key-management service supplying keypairs for secured modes.
pub trait SecretStore: Send + Sync {
    /// Fetch the keypair stored under `bucket`/`key`.
    fn key_pair(&self, bucket: &str, key: &str) -> Result<Credentials>;
}

#[derive(Deserialize)]
struct StoredKeyPair {
    public_key: String,
    secret_key: String,
}

/// Secret store backed by a directory tree: `<root>/<bucket>/<key>.yml`.
///
/// Each file holds `public_key` and `secret_key` in Z85.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(format!("{key}.yml"))
    }
}

impl SecretStore for FileSecretStore {
    fn key_pair(&self, bucket: &str, key: &str) -> Result<Credentials> {
        let path = self.path(bucket, key);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::auth(format!("secret {}/{} unavailable: {}", bucket, key, e))
        })?;
        let stored: StoredKeyPair = serde_yaml::from_str(&raw)
            .map_err(|e| Error::auth(format!("secret {}/{} is malformed: {}", bucket, key, e)))?;
        Credentials::key_pair(stored.public_key, stored.secret_key)
    }
}

/// In-memory secret store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<(String, String), Credentials>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, credentials: Credentials) {
        self.secrets
            .write()
            .insert((bucket.to_owned(), key.to_owned()), credentials);
    }
}

impl SecretStore for MemorySecretStore {
    fn key_pair(&self, bucket: &str, key: &str) -> Result<Credentials> {
        self.secrets
            .read()
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
            .ok_or_else(|| Error::auth(format!("secret {}/{} not found", bucket, key)))
    }
}
