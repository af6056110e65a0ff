use crate::addressing::Address;
use crate::config::Config;
use crate::connection::{Connection, ConnectionState};
use crate::errors::{BoltResult, PoolError};
use crate::logging;
use crate::values::Value;
use slog::Logger;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A checked-out slot holds no connection; `release` puts one back or
/// removes the slot.
struct Entry {
    connection: Option<Connection>,
    in_use: bool,
}

/// Bounded pool of connections to a single endpoint. Acquire and
/// release serialise on one mutex; the release-side RESET round-trip
/// runs under it.
pub struct DirectPool {
    address: Address,
    auth_token: Value,
    config: Config,
    entries: Mutex<Vec<Entry>>,
    released: Condvar,
    log: Logger,
}

impl DirectPool {
    pub fn new(address: Address, auth_token: Value, config: Config) -> DirectPool {
        let log = config.log.new(logging::o!("pool" => address.to_string()));
        DirectPool {
            address,
            auth_token,
            config,
            entries: Mutex::new(Vec::new()),
            released: Condvar::new(),
            log,
        }
    }

    #[inline]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Hand out an idle healthy connection, opening a new one when the
    /// pool has room. With the pool full this fails fast
    /// (`PoolError::Full`) unless an acquisition wait is configured.
    pub fn acquire(&self) -> BoltResult<Connection> {
        let wait = self.config.max_connection_acquisition_time_ms;
        let deadline = if wait > 0 { Some(Instant::now() + Duration::from_millis(wait)) } else { None };

        let mut entries = self.entries.lock().expect("Pool lock poisoned");
        loop {
            // Prefer an idle entry; evict the stale ones on the way.
            let mut index = 0;
            while index < entries.len() {
                if entries[index].in_use {
                    index += 1;
                    continue;
                }
                if self.is_healthy(&entries[index]) {
                    let connection =
                        entries[index].connection.take().expect("Healthy idle entry has a connection");
                    entries[index].in_use = true;
                    logging::trace!(self.log, "connection reused"; "connection_id" => connection.id());
                    return Ok(connection);
                }
                if let Some(mut stale) = entries[index].connection.take() {
                    logging::debug!(self.log, "evicting stale connection"; "connection_id" => stale.id());
                    stale.close();
                }
                entries.remove(index);
            }

            if entries.len() < self.config.max_pool_size {
                entries.push(Entry { connection: None, in_use: true });
                match self.open_connection() {
                    Ok(connection) => return Ok(connection),
                    Err(error) => {
                        entries.pop();
                        return Err(error);
                    }
                }
            }

            let deadline = match deadline {
                None => return Err(PoolError::Full.into()),
                Some(deadline) => deadline,
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::AcquisitionTimedOut.into());
            }
            let (reacquired, _) = self
                .released
                .wait_timeout(entries, deadline - now)
                .expect("Pool lock poisoned");
            entries = reacquired;
        }
    }

    /// Return a connection. Defunct connections are discarded; Failed
    /// ones are RESET and recycled, or discarded when the RESET fails.
    pub fn release(&self, mut connection: Connection) {
        let mut entries = self.entries.lock().expect("Pool lock poisoned");

        let recycled = match connection.status().state {
            ConnectionState::Ready => Some(connection),
            ConnectionState::Failed => match connection.reset() {
                Ok(()) => Some(connection),
                Err(_) => {
                    logging::debug!(self.log, "discarding connection after failed reset";
                                    "connection_id" => connection.id());
                    connection.close();
                    None
                }
            },
            _ => {
                logging::debug!(self.log, "discarding connection";
                                "connection_id" => connection.id(),
                                "state" => ?connection.status().state);
                connection.close();
                None
            }
        };

        let slot = entries.iter().position(|entry| entry.in_use && entry.connection.is_none());
        match (slot, recycled) {
            (Some(index), Some(connection)) => {
                entries[index].connection = Some(connection);
                entries[index].in_use = false;
            }
            (Some(index), None) => {
                entries.remove(index);
            }
            (None, Some(mut connection)) => {
                // Released into a pool that never handed it out.
                connection.close();
            }
            (None, None) => {}
        }

        self.released.notify_one();
    }

    pub fn connections_in_use(&self) -> usize {
        let entries = self.entries.lock().expect("Pool lock poisoned");
        entries.iter().filter(|entry| entry.in_use).count()
    }

    /// Close every pooled connection.
    pub fn destroy(&self) {
        let mut entries = self.entries.lock().expect("Pool lock poisoned");
        for entry in entries.iter_mut() {
            if let Some(mut connection) = entry.connection.take() {
                connection.close();
            }
        }
        entries.clear();
    }

    fn is_healthy(&self, entry: &Entry) -> bool {
        let connection = match entry.connection.as_ref() {
            Some(connection) => connection,
            None => return false,
        };
        if connection.status().state != ConnectionState::Ready {
            return false;
        }
        let max_life = self.config.max_connection_life_time_ms;
        max_life == 0
            || connection
                .age()
                .map_or(true, |age| age < Duration::from_millis(max_life))
    }

    fn open_connection(&self) -> BoltResult<Connection> {
        let mut connection = Connection::new(self.address.clone(), &self.log);
        connection.open(&self.config)?;
        connection.init(&self.config.user_agent, &self.auth_token)?;
        Ok(connection)
    }
}
