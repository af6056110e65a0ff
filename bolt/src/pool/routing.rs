use crate::addressing::{Address, AddressSet};
use crate::config::{AccessMode, Config};
use crate::connection::Connection;
use crate::errors::{BoltError, BoltResult, RoutingError};
use crate::logging;
use crate::pool::direct::DirectPool;
use crate::pool::routing_table::RoutingTable;
use crate::values::Value;
use indexmap::IndexMap;
use slog::Logger;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Connection-level failures tolerated before an acquire gives up.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Discovery procedure invoked against a routing-capable member.
const ROUTING_TABLE_CALL: &str = "CALL dbms.cluster.routing.getRoutingTable($context)";

/// Routing-aware pool: one direct pool per known server, selected by
/// least-connected round-robin over the routing table's member sets.
/// Acquiring threads read the table under a shared lock; refresh runs
/// under the exclusive lock.
pub struct RoutingPool {
    config: Config,
    auth_token: Value,
    initial_routers: AddressSet,
    table: RwLock<RoutingTable>,
    pools: RwLock<IndexMap<Address, Arc<DirectPool>>>,
    readers_offset: AtomicUsize,
    writers_offset: AtomicUsize,
    log: Logger,
}

impl RoutingPool {
    /// The table starts empty except for the initial routers: the
    /// configured address, or whatever the user's resolver maps it to.
    pub fn new(address: Address, auth_token: Value, config: Config) -> RoutingPool {
        let mut initial_routers = AddressSet::new();
        match &config.address_resolver {
            Some(resolver) => {
                for resolved in resolver(&address) {
                    initial_routers.add(resolved);
                }
            }
            None => {
                initial_routers.add(address.clone());
            }
        }
        if initial_routers.is_empty() {
            initial_routers.add(address);
        }

        let log = config.log.new(logging::o!("pool" => "routing"));
        RoutingPool {
            config,
            auth_token,
            initial_routers,
            table: RwLock::new(RoutingTable::new()),
            pools: RwLock::new(IndexMap::new()),
            readers_offset: AtomicUsize::new(0),
            writers_offset: AtomicUsize::new(0),
            log,
        }
    }

    pub fn acquire(&self, mode: AccessMode) -> BoltResult<Connection> {
        let mut last_error: BoltError = RoutingError::NoServersToSelect.into();

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            self.ensure_fresh(mode)?;

            let server = match self.select_server(mode) {
                Some(server) => server,
                None => return Err(RoutingError::NoServersToSelect.into()),
            };

            let pool = self.ensure_pool(&server);
            match pool.acquire() {
                Ok(connection) => return Ok(connection),
                Err(error @ BoltError::Pool(_)) => return Err(error),
                Err(error) => {
                    logging::info!(self.log, "forgetting server after acquire failure";
                                   "server" => %server, "error" => %error);
                    self.forget_server(&server);
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }

    /// Route the connection back to its server's pool.
    pub fn release(&self, connection: Connection) {
        let pool = {
            let pools = self.pools.read().expect("Pool map lock poisoned");
            pools.get(connection.address()).cloned()
        };
        match pool {
            Some(pool) => pool.release(connection),
            None => {
                let mut connection = connection;
                connection.close();
            }
        }
    }

    pub fn destroy(&self) {
        let mut pools = self.pools.write().expect("Pool map lock poisoned");
        for (_, pool) in pools.iter() {
            pool.destroy();
        }
        pools.clear();
    }

    pub fn connections_in_use(&self) -> usize {
        let pools = self.pools.read().expect("Pool map lock poisoned");
        pools.values().map(|pool| pool.connections_in_use()).sum()
    }

    /// Double-checked refresh: cheap read-side test, then re-check under
    /// the write lock before paying for discovery.
    pub(crate) fn ensure_fresh(&self, mode: AccessMode) -> BoltResult<()> {
        {
            let table = self.table.read().expect("Routing table lock poisoned");
            if !table.is_expired(mode) {
                return Ok(());
            }
        }

        let mut table = self.table.write().expect("Routing table lock poisoned");
        if table.is_expired(mode) {
            self.refresh(&mut table)?;
        }
        Ok(())
    }

    /// Try each candidate router in order: current routers first, then
    /// the initial ones. First successful, well-formed response wins.
    fn refresh(&self, table: &mut RoutingTable) -> BoltResult<()> {
        let mut candidates = AddressSet::new();
        candidates.add_all(&table.routers);
        candidates.add_all(&self.initial_routers);

        for candidate in candidates.iter() {
            let response = match self.fetch_routing_table(candidate) {
                Ok(response) => response,
                Err(error) => {
                    logging::info!(self.log, "discovery failed";
                                   "router" => %candidate, "error" => %error);
                    continue;
                }
            };
            match table.update(&response) {
                Ok(()) => {
                    logging::debug!(self.log, "routing table refreshed";
                                    "readers" => table.readers.len(),
                                    "writers" => table.writers.len(),
                                    "routers" => table.routers.len());
                    self.gc_pools(table);
                    return Ok(());
                }
                Err(error) => {
                    logging::info!(self.log, "discovery response rejected";
                                   "router" => %candidate, "error" => %error);
                }
            }
        }

        Err(RoutingError::UnableToRetrieveRoutingTable.into())
    }

    /// Run the discovery procedure on one candidate and build the
    /// response dictionary from the single expected record.
    fn fetch_routing_table(&self, candidate: &Address) -> BoltResult<Value> {
        let pool = self.ensure_pool(candidate);
        let mut connection = pool.acquire()?;
        let response = self.run_discovery(&mut connection);
        pool.release(connection);
        response
    }

    fn run_discovery(&self, connection: &mut Connection) -> BoltResult<Value> {
        connection.clear_run()?;
        connection.set_run_cypher(ROUTING_TABLE_CALL)?;
        let context = self
            .config
            .routing_context
            .clone()
            .unwrap_or_else(|| Value::dictionary_of(vec![]));
        connection.set_run_cypher_parameter("context", context)?;

        connection.load_run()?;
        let pull = connection.load_pull()?;
        connection.send()?;

        let mut response: Option<Value> = None;
        loop {
            match connection.fetch(pull)? {
                crate::connection::Fetched::Record => {
                    if response.is_some() {
                        // The procedure yields exactly one record.
                        return Err(RoutingError::UnexpectedDiscoveryResponse.into());
                    }
                    response = Some(zip_record(connection)?);
                }
                crate::connection::Fetched::Summary => break,
            }
        }
        response.ok_or_else(|| RoutingError::UnexpectedDiscoveryResponse.into())
    }

    /// Least-connected round-robin over the mode's member set.
    fn select_server(&self, mode: AccessMode) -> Option<Address> {
        let table = self.table.read().expect("Routing table lock poisoned");
        let (servers, offset) = match mode {
            AccessMode::Read => (&table.readers, &self.readers_offset),
            AccessMode::Write => (&table.writers, &self.writers_offset),
        };
        let start = offset.fetch_add(1, Ordering::Relaxed);
        select_least_connected(servers, start, |address| self.connections_in_use_for(address))
    }

    fn connections_in_use_for(&self, address: &Address) -> usize {
        let pools = self.pools.read().expect("Pool map lock poisoned");
        pools.get(address).map_or(0, |pool| pool.connections_in_use())
    }

    fn ensure_pool(&self, address: &Address) -> Arc<DirectPool> {
        {
            let pools = self.pools.read().expect("Pool map lock poisoned");
            if let Some(pool) = pools.get(address) {
                return pool.clone();
            }
        }

        let mut pools = self.pools.write().expect("Pool map lock poisoned");
        pools
            .entry(address.clone())
            .or_insert_with(|| {
                Arc::new(DirectPool::new(address.clone(), self.auth_token.clone(), self.config.clone()))
            })
            .clone()
    }

    pub(crate) fn forget_server(&self, address: &Address) {
        let mut table = self.table.write().expect("Routing table lock poisoned");
        table.forget_server(address);
    }

    /// Collect per-server pools that dropped out of the table and are
    /// idle. A pool with connections in use is never evicted.
    fn gc_pools(&self, table: &RoutingTable) {
        let mut pools = self.pools.write().expect("Pool map lock poisoned");
        pools.retain(|address, pool| {
            if table.knows(address) || pool.connections_in_use() > 0 {
                true
            } else {
                pool.destroy();
                false
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn table_snapshot(&self) -> RoutingTable {
        self.table.read().expect("Routing table lock poisoned").clone()
    }
}

/// Scan the set starting at `start % len`, keeping the first member
/// with the fewest connections in use.
pub(crate) fn select_least_connected(
    servers: &AddressSet,
    start: usize,
    in_use: impl Fn(&Address) -> usize,
) -> Option<Address> {
    let count = servers.len();
    if count == 0 {
        return None;
    }

    let mut best: Option<(usize, Address)> = None;
    for step in 0..count {
        let address = servers.get((start + step) % count).expect("Index within set bounds");
        let used = in_use(address);
        if best.as_ref().map_or(true, |(least, _)| used < *least) {
            best = Some((used, address.clone()));
        }
    }
    best.map(|(_, address)| address)
}

/// Zip the current record's values against the result field names into
/// a dictionary.
fn zip_record(connection: &Connection) -> BoltResult<Value> {
    let names = connection
        .field_names()
        .as_list()
        .ok_or(RoutingError::UnexpectedDiscoveryResponse)?;
    let values = connection
        .field_values()
        .list_value(0)
        .and_then(Value::as_list)
        .ok_or(RoutingError::UnexpectedDiscoveryResponse)?;
    if names.len() != values.len() {
        return Err(RoutingError::UnexpectedDiscoveryResponse.into());
    }

    let mut response = Value::dictionary_of(vec![]);
    for (name, value) in names.iter().zip(values) {
        let key = name.as_string().ok_or(RoutingError::UnexpectedDiscoveryResponse)?;
        response.insert(key, value.clone());
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::pool::routing_table::discovery_response;
    use crate::protocol::{MSG_RECORD, MSG_SUCCESS};
    use crate::testkit::{self, StubServer};
    use std::collections::HashMap;
    use std::net::TcpListener;

    fn routing_config() -> Config {
        let mut config = Config::default();
        config.scheme = crate::config::Scheme::Routing;
        config
    }

    fn init_success() -> Vec<u8> {
        testkit::success(Value::dictionary_of(vec![("server", Value::from("GraphServer/3.4"))]))
    }

    fn run_fields_success() -> Vec<u8> {
        testkit::success(Value::dictionary_of(vec![(
            "fields",
            Value::list_of(vec![Value::from("ttl"), Value::from("servers")]),
        )]))
    }

    /// RECORD carrying [ttl, servers] followed by the PULL summary.
    fn discovery_reply(ttl: i64, readers: &[&str], writers: &[&str], routers: &[&str]) -> Vec<u8> {
        let response = discovery_response(ttl, readers, writers, routers);
        let ttl_value = response.value_by_key("ttl").unwrap().clone();
        let servers_value = response.value_by_key("servers").unwrap().clone();

        let mut reply = testkit::message(MSG_RECORD, vec![Value::list_of(vec![ttl_value, servers_value])]);
        reply.extend(testkit::message(MSG_SUCCESS, vec![Value::dictionary_of(vec![])]));
        reply
    }

    fn dead_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("127.0.0.1:{}", port)
    }

    #[test]
    fn test_bootstrap_refresh_populates_table() {
        let router = StubServer::start(1, vec![vec![
            init_success(),
            run_fields_success(),
            discovery_reply(
                30,
                &["reader-a:7687", "reader-b:7687"],
                &["writer-c:7687"],
                &["router-d:7687", "router-e:7687"],
            ),
        ]]);

        let pool = RoutingPool::new(router.address(), crate::auth::none(), routing_config());
        pool.ensure_fresh(AccessMode::Read).unwrap();

        let table = pool.table_snapshot();
        assert_eq!(table.readers.len(), 2);
        assert!(table.readers.contains(&Address::new("reader-a", "7687")));
        assert!(table.readers.contains(&Address::new("reader-b", "7687")));
        assert_eq!(table.writers.get(0).unwrap(), &Address::new("writer-c", "7687"));
        assert_eq!(table.routers.len(), 2);
        assert_eq!(table.expires_at_millis, table.last_updated_millis + 30000);

        // Fresh for both modes now; no further discovery runs.
        pool.ensure_fresh(AccessMode::Write).unwrap();
        pool.destroy();
    }

    #[test]
    fn test_refresh_failure_reports_unable_to_retrieve() {
        let mut config = routing_config();
        config.connect_timeout_ms = 500;
        let address = Address::parse(&dead_endpoint()).unwrap();
        let pool = RoutingPool::new(address, crate::auth::none(), config);

        assert_eq!(
            pool.acquire(AccessMode::Read).unwrap_err(),
            BoltError::Routing(RoutingError::UnableToRetrieveRoutingTable)
        );
    }

    #[test]
    fn test_write_acquire_end_to_end() {
        let writer = StubServer::start(1, vec![vec![init_success()]]);
        let writer_endpoint = format!("127.0.0.1:{}", writer.port());

        let router = StubServer::start(1, vec![vec![
            init_success(),
            run_fields_success(),
            discovery_reply(300, &[], &[&writer_endpoint], &["unused-router:7687"]),
        ]]);

        let pool = RoutingPool::new(router.address(), crate::auth::none(), routing_config());
        let connection = pool.acquire(AccessMode::Write).unwrap();
        assert_eq!(connection.status().state, ConnectionState::Ready);
        assert_eq!(connection.address(), &Address::new("127.0.0.1", &writer.port().to_string()));
        assert_eq!(pool.connections_in_use(), 1);

        pool.release(connection);
        assert_eq!(pool.connections_in_use(), 0);
        pool.destroy();
    }

    #[test]
    fn test_acquire_forgets_unreachable_server() {
        let dead = dead_endpoint();
        let dead_address = Address::parse(&dead).unwrap();

        // Each failed attempt forgets the reader and forces another
        // refresh; the script answers three discovery rounds.
        let mut script = vec![init_success()];
        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            script.push(run_fields_success());
            script.push(discovery_reply(300, &[&dead], &[], &["unused-router:7687"]));
        }
        let router = StubServer::start(1, vec![script]);

        let mut config = routing_config();
        config.connect_timeout_ms = 500;
        let pool = RoutingPool::new(router.address(), crate::auth::none(), config);

        let error = pool.acquire(AccessMode::Read).unwrap_err();
        match error {
            BoltError::Transport(_) => {}
            other => panic!("Expected a transport error, got {:?}", other),
        }

        // The unreachable reader was forgotten by the final attempt.
        let table = pool.table_snapshot();
        assert!(!table.knows(&dead_address));
        pool.destroy();
    }

    #[test]
    fn test_least_connected_selection() {
        let mut servers = AddressSet::new();
        servers.add(Address::new("s1", "7687"));
        servers.add(Address::new("s2", "7687"));
        servers.add(Address::new("s3", "7687"));

        let mut in_use: HashMap<String, usize> = HashMap::new();
        in_use.insert("s1".to_owned(), 2);
        in_use.insert("s2".to_owned(), 5);
        in_use.insert("s3".to_owned(), 3);

        let pick = |start: usize, in_use: &HashMap<String, usize>| {
            select_least_connected(&servers, start, |address| in_use[address.host()])
                .unwrap()
                .host()
                .to_owned()
        };

        // 2, 5, 3 in use: the first server wins.
        assert_eq!(pick(0, &in_use), "s1");

        // After adding a connection to s1 the third server (3 in use,
        // tied with s1) wins from the advanced offset.
        in_use.insert("s1".to_owned(), 3);
        assert_eq!(pick(1, &in_use), "s3");
    }

    #[test]
    fn test_select_from_empty_set() {
        let servers = AddressSet::new();
        assert!(select_least_connected(&servers, 7, |_| 0).is_none());
    }

    #[test]
    fn test_resolver_seeds_initial_routers() {
        let mut config = routing_config();
        config.address_resolver = Some(Arc::new(|address: &Address| {
            vec![
                Address::new(address.host(), "9001"),
                Address::new(address.host(), "9002"),
            ]
        }));

        let pool = RoutingPool::new(Address::new("cluster", "7687"), crate::auth::none(), config);
        assert_eq!(pool.initial_routers.len(), 2);
        assert!(pool.initial_routers.contains(&Address::new("cluster", "9001")));
        assert!(!pool.initial_routers.contains(&Address::new("cluster", "7687")));
    }
}
