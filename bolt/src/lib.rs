#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Synchronous client driver for graph database servers speaking the Bolt
//! protocol over TCP or TLS. The driver exposes a request-oriented
//! connection API plus direct and routing-aware connection pooling.

pub mod addressing;
pub mod auth;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod connector;
pub mod errors;
pub mod logging;
pub mod packstream;
pub mod pool;
pub mod protocol;
pub mod time;
pub mod transport;
pub mod values;

#[cfg(test)]
pub(crate) mod testkit;

pub use crate::addressing::{Address, AddressSet};
pub use crate::config::{AccessMode, Config, Scheme, TransportMode, Trust};
pub use crate::connection::{Connection, ConnectionState, Fetched, Status};
pub use crate::connector::Connector;
pub use crate::errors::{BoltError, BoltResult};
pub use crate::values::Value;

/// Protocol versions this driver negotiates, in preference order.
pub const PROTOCOL_VERSIONS: [u32; 4] = [2, 1, 0, 0];
