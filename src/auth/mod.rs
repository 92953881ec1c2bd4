//! CURVE authentication registry.
//!
//! libzmq authenticates CURVE peers by asking a ZAP handler (RFC 27) bound at
//! `inproc://zeromq.zap.01` on the same context. `AuthRegistry` holds the
//! whitelisted client keys per authentication domain and serves those
//! requests. It is an explicit object handed to each component that needs it,
//! so separate contexts (and separate tests) never share a whitelist.
//!
//! # Usage
//!
//! ```ignore
//! let auth = Arc::new(AuthRegistry::new());
//! let _zap = auth.start_zap_handler(&context)?;
//!
//! auth.allow("categorizer_broadcast", [client_public_key])?;
//! ```

use crate::error::{Error, Result};
use crate::service::credentials::decode_key;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

/// Endpoint libzmq sends ZAP requests to.
pub const ZAP_ENDPOINT: &str = "inproc://zeromq.zap.01";

const ZAP_VERSION: &[u8] = b"1.0";

/// Authentication domains and their whitelisted CURVE public keys.
#[derive(Debug, Default)]
pub struct AuthRegistry {
    domains: RwLock<HashMap<String, HashSet<[u8; 32]>>>,
}

/// A decoded ZAP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapRequest {
    pub request_id: Vec<u8>,
    pub domain: String,
    pub address: String,
    pub mechanism: String,
    pub credentials: Vec<Vec<u8>>,
}

/// Outcome of a ZAP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZapStatus {
    Allowed,
    Denied,
}

impl ZapStatus {
    fn code(&self) -> &'static [u8] {
        match self {
            ZapStatus::Allowed => b"200",
            ZapStatus::Denied => b"400",
        }
    }

    fn text(&self) -> &'static [u8] {
        match self {
            ZapStatus::Allowed => b"OK",
            ZapStatus::Denied => b"access denied",
        }
    }
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whitelist Z85 public keys for `domain`.
    ///
    /// Registering a domain, even with no keys, makes it secured: only the
    /// listed CURVE keys are accepted from then on.
    pub fn allow<I, K>(&self, domain: &str, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let decoded = keys
            .into_iter()
            .map(|k| decode_key(k.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut domains = self.domains.write();
        let entry = domains.entry(domain.to_owned()).or_default();
        let added = decoded.len();
        entry.extend(decoded);
        debug!(domain, added, total = entry.len(), "whitelisted curve keys");
        Ok(())
    }

    /// Remove a domain and all its keys.
    pub fn remove_domain(&self, domain: &str) {
        self.domains.write().remove(domain);
    }

    pub fn has_domain(&self, domain: &str) -> bool {
        self.domains.read().contains_key(domain)
    }

    pub fn is_allowed(&self, domain: &str, key: &[u8]) -> bool {
        self.domains
            .read()
            .get(domain)
            .is_some_and(|keys| keys.iter().any(|k| k.as_slice() == key))
    }

    /// Decide a ZAP request.
    ///
    /// CURVE requests pass when the key is whitelisted for the domain. NULL
    /// requests pass only for domains nobody secured.
    pub fn authorize(&self, request: &ZapRequest) -> ZapStatus {
        let allowed = match request.mechanism.as_str() {
            "CURVE" => request
                .credentials
                .first()
                .is_some_and(|key| self.is_allowed(&request.domain, key)),
            "NULL" => !self.has_domain(&request.domain),
            _ => false,
        };

        if allowed {
            ZapStatus::Allowed
        } else {
            ZapStatus::Denied
        }
    }

    /// Bind the ZAP endpoint on `context` and answer requests on a dedicated
    /// thread until the context is terminated.
    ///
    /// Only one handler may be bound per context.
    pub fn start_zap_handler(self: &Arc<Self>, context: &zmq::Context) -> Result<JoinHandle<()>> {
        let socket = context.socket(zmq::REP)?;
        socket.set_linger(0)?;
        socket
            .bind(ZAP_ENDPOINT)
            .map_err(|e| Error::network(ZAP_ENDPOINT, e))?;

        let registry = Arc::clone(self);
        std::thread::Builder::new()
            .name("zap-handler".into())
            .spawn(move || registry.serve(socket))
            .map_err(Error::from)
    }

    fn serve(&self, socket: zmq::Socket) {
        debug!("ZAP handler listening on {}", ZAP_ENDPOINT);
        loop {
            let frames = match socket.recv_multipart(0) {
                Ok(frames) => frames,
                Err(zmq::Error::ETERM) => break,
                Err(e) => {
                    warn!("ZAP handler receive failed: {}", e);
                    continue;
                }
            };

            let reply = match parse_request(frames) {
                Some(request) => {
                    let status = self.authorize(&request);
                    trace!(
                        domain = %request.domain,
                        mechanism = %request.mechanism,
                        address = %request.address,
                        ?status,
                        "ZAP decision"
                    );
                    build_reply(&request.request_id, status)
                }
                None => {
                    warn!("malformed ZAP request");
                    build_reply(b"", ZapStatus::Denied)
                }
            };

            if let Err(e) = socket.send_multipart(reply, 0) {
                if e == zmq::Error::ETERM {
                    break;
                }
                warn!("ZAP handler reply failed: {}", e);
            }
        }
        debug!("ZAP handler stopped");
    }
}

fn parse_request(frames: Vec<Vec<u8>>) -> Option<ZapRequest> {
    let mut frames = frames.into_iter();
    let version = frames.next()?;
    if version != ZAP_VERSION {
        return None;
    }
    let request_id = frames.next()?;
    let domain = String::from_utf8(frames.next()?).ok()?;
    let address = String::from_utf8(frames.next()?).ok()?;
    let _identity = frames.next()?;
    let mechanism = String::from_utf8(frames.next()?).ok()?;

    Some(ZapRequest {
        request_id,
        domain,
        address,
        mechanism,
        credentials: frames.collect(),
    })
}

fn build_reply(request_id: &[u8], status: ZapStatus) -> Vec<Vec<u8>> {
    vec![
        ZAP_VERSION.to_vec(),
        request_id.to_vec(),
        status.code().to_vec(),
        status.text().to_vec(),
        Vec::new(),
        Vec::new(),
    ]
}
