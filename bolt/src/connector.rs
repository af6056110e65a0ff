use crate::addressing::Address;
use crate::config::{AccessMode, Config, Scheme};
use crate::connection::Connection;
use crate::errors::BoltResult;
use crate::pool::{DirectPool, RoutingPool};
use crate::values::Value;

enum Pools {
    Direct(DirectPool),
    Routing(RoutingPool),
}

/// User-facing entry point: owns the pooling strategy selected by
/// `Config::scheme` and hands out connections.
pub struct Connector {
    pools: Pools,
}

impl Connector {
    pub fn new(address: Address, auth_token: Value, config: Config) -> Connector {
        let pools = match config.scheme {
            Scheme::Direct => Pools::Direct(DirectPool::new(address, auth_token, config)),
            Scheme::Routing => Pools::Routing(RoutingPool::new(address, auth_token, config)),
        };
        Connector { pools }
    }

    /// Acquire a connection for the given access mode. Direct pooling
    /// serves both modes from its single endpoint.
    pub fn acquire(&self, mode: AccessMode) -> BoltResult<Connection> {
        match &self.pools {
            Pools::Direct(pool) => pool.acquire(),
            Pools::Routing(pool) => pool.acquire(mode),
        }
    }

    pub fn release(&self, connection: Connection) {
        match &self.pools {
            Pools::Direct(pool) => pool.release(connection),
            Pools::Routing(pool) => pool.release(connection),
        }
    }

    /// Close every pooled connection.
    pub fn destroy(&self) {
        match &self.pools {
            Pools::Direct(pool) => pool.destroy(),
            Pools::Routing(pool) => pool.destroy(),
        }
    }
}
