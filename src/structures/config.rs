use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::uri::{describe_endpoint, parse_endpoint_uri};
use crate::structures::{LinkError, TResult};

/// Port the device simulator listens on.
pub const DEFAULT_PORT: u16 = 55555;
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Remote device address. Resolved once when built, never re-resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    addr: SocketAddr,
}

impl Endpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn from_host_port(host: &str, port: u16) -> TResult<Self> {
        parse_endpoint_uri(&format!("{}:{}", host, port)).map(Self::new)
    }

    pub fn from_uri(uri: &str) -> TResult<Self> {
        parse_endpoint_uri(uri).map(Self::new)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = LinkError;

    fn try_from(value: String) -> TResult<Self> {
        Self::from_uri(&value)
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        describe_endpoint(&value.addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe_endpoint(&self.addr))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub endpoint: Endpoint,
    /// Capacity used when the link allocates the receive buffer itself.
    pub recv_buffer_size: usize,
    pub connect_timeout_ms: u64,
    pub nodelay: bool,
}

impl LinkConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, ..Self::default() }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            nodelay: true,
        }
    }
}
