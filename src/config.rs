//! Configuration for the socket and HTTP transports.
//!
//! Plain structs with `Default` and fluent setters. Nothing is read from
//! disk or the environment except by [`Credentials::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{StreamError, StreamResult};
use crate::etsi014::RedemptionPolicy;
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

/// Default TCP port of an ETSI 004 node.
pub const DEFAULT_PORT: u16 = 25575;

/// Default connect timeout for the socket transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for the HTTP transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// URI scheme of socket destinations.
pub const SERVER_SCHEME: &str = "server://";

/// Socket transport settings for [`SocketStreamBackend`](crate::etsi004::SocketStreamBackend).
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Port used when the destination URI has none.
    pub default_port: u16,
    pub connect_timeout: Duration,
    /// Largest frame payload accepted from the peer.
    pub max_payload_size: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl SocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default: 25575
    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Default: 16 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Resolve `server://host[:port]` to a `host:port` address string.
    pub fn resolve_destination(&self, destination: &str) -> StreamResult<String> {
        let rest = destination.strip_prefix(SERVER_SCHEME).ok_or_else(|| {
            StreamError::NoConnection(format!(
                "destination {:?} does not start with {}",
                destination, SERVER_SCHEME
            ))
        })?;
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(StreamError::NoConnection(format!(
                "destination {:?} has no host",
                destination
            )));
        }

        // Bracketed IPv6 literals carry colons of their own.
        let has_port = match authority.rfind(']') {
            Some(close) => authority[close..].contains(':'),
            None => authority.contains(':'),
        };
        if has_port {
            Ok(authority.to_string())
        } else {
            Ok(format!("{}:{}", authority, self.default_port))
        }
    }
}

/// HTTP transport settings for [`HttpRetrievalBackend`](crate::etsi014::HttpRetrievalBackend).
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub request_timeout: Duration,
    /// Redemption policy the remote KME is assumed to follow.
    pub redemption_policy: RedemptionPolicy,
    /// Check the KME certificate's hostname. CA verification is always on.
    pub verify_hostname: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            redemption_policy: RedemptionPolicy::SingleUse,
            verify_hostname: false,
        }
    }
}

impl HttpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default: 10 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Default: [`RedemptionPolicy::SingleUse`]
    pub fn redemption_policy(mut self, policy: RedemptionPolicy) -> Self {
        self.redemption_policy = policy;
        self
    }

    /// Default: false
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.verify_hostname = verify;
        self
    }
}

/// Which SAE the caller acts as in an ETSI 014 exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaeRole {
    /// Requests new keys (`enc_keys`).
    Master,
    /// Redeems keys by ID (`dec_keys`).
    Slave,
}

impl SaeRole {
    fn env_prefix(self) -> &'static str {
        match self {
            SaeRole::Master => "QKD_MASTER",
            SaeRole::Slave => "QKD_SLAVE",
        }
    }
}

/// Client certificate material, passed through to the transport.
///
/// Paths are not opened here; backends that need TLS load them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub ca_cert_path: Option<PathBuf>,
}

impl Credentials {
    /// No client certificate.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_cert_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
            ca_cert_path: Some(ca_cert_path.into()),
        }
    }

    /// Read `QKD_{MASTER,SLAVE}_{CERT,KEY,CA_CERT}_PATH`.
    ///
    /// Unset or empty variables leave the matching path empty.
    pub fn from_env(role: SaeRole) -> Self {
        Self::from_lookup(role, |name| std::env::var(name).ok())
    }

    fn from_lookup(role: SaeRole, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let prefix = role.env_prefix();
        let get = |suffix: &str| {
            lookup(&format!("{}_{}", prefix, suffix))
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            cert_path: get("CERT_PATH"),
            key_path: get("KEY_PATH"),
            ca_cert_path: get("CA_CERT_PATH"),
        }
    }

    /// True when a client certificate and key are both configured.
    pub fn has_identity(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}
