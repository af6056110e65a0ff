use crate::addressing::Address;
use crate::logging;
use crate::values::Value;
use serde_derive::{Deserialize, Serialize};
use slog::Logger;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_PORT: &str = "7687";
pub const DEFAULT_USER_AGENT: &str = concat!("bolt/", env!("CARGO_PKG_VERSION"));

const DEFAULT_MAX_POOL_SIZE: usize = 100;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// How the connector reaches the cluster: a single endpoint, or
/// routing-table driven member selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Direct,
    Routing,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Plaintext,
    Encrypted,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Trust material for encrypted transports. An empty certificate buffer
/// selects the platform trust store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Trust {
    /// PEM bundle of trusted certificates.
    pub certificates: Vec<u8>,
    /// Accept any certificate. Test rigs only.
    pub skip_verify: bool,
}

/// Resolver callback mapping a configured address to the addresses to
/// use in its place (initial routers, split-horizon setups).
pub type AddressResolver = Arc<dyn Fn(&Address) -> Vec<Address> + Send + Sync>;

/// Driver configuration. The data-carrying subset can be loaded from a
/// TOML file; logger, resolver and routing context are wired up in code.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheme: Scheme,
    pub transport: TransportMode,
    pub trust: Trust,
    pub user_agent: String,
    pub max_pool_size: usize,
    /// Connections older than this are evicted on acquire. 0 disables.
    pub max_connection_life_time_ms: u64,
    /// How long an acquire may wait for a free slot. 0 fails fast with
    /// a pool-full error.
    pub max_connection_acquisition_time_ms: u64,
    pub connect_timeout_ms: u64,
    /// Receive timeout per read. 0 blocks indefinitely.
    pub recv_timeout_ms: u64,
    pub keep_alive: bool,
    pub no_delay: bool,
    /// Routing context passed to the discovery procedure.
    #[serde(skip, default)]
    pub routing_context: Option<Value>,
    #[serde(skip, default)]
    pub address_resolver: Option<AddressResolver>,
    #[serde(skip, default = "logging::null")]
    pub log: Logger,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            scheme: Scheme::Direct,
            transport: TransportMode::Plaintext,
            trust: Trust::default(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            max_connection_life_time_ms: 0,
            max_connection_acquisition_time_ms: 0,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            recv_timeout_ms: 0,
            keep_alive: true,
            no_delay: true,
            routing_context: None,
            address_resolver: None,
            log: logging::null(),
        }
    }
}

impl Config {
    /// Load the data-carrying configuration subset from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Config {
        serdeconv::from_toml_file(path).expect("Error loading driver configuration file")
    }
}
