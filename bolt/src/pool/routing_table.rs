use crate::addressing::{Address, AddressSet};
use crate::config::AccessMode;
use crate::errors::{BoltResult, RoutingError};
use crate::time;
use crate::values::Value;

/// Cached cluster topology: which members serve reads, writes and
/// routing requests, plus an expiry stamp.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub readers: AddressSet,
    pub writers: AddressSet,
    pub routers: AddressSet,
    pub expires_at_millis: u64,
    pub last_updated_millis: u64,
}

impl RoutingTable {
    pub fn new() -> RoutingTable {
        RoutingTable::default()
    }

    /// A table is expired for a mode when it has no routers, no members
    /// for that mode, or its TTL has lapsed.
    pub fn is_expired(&self, mode: AccessMode) -> bool {
        if self.routers.is_empty() {
            return true;
        }
        let empty_for_mode = match mode {
            AccessMode::Read => self.readers.is_empty(),
            AccessMode::Write => self.writers.is_empty(),
        };
        empty_for_mode || time::timestamp_millis() >= self.expires_at_millis
    }

    /// Apply a discovery response: `{ttl: Integer, servers: [{role,
    /// addresses}]}`. The three sets are replaced atomically from the
    /// caller's perspective (the caller holds the table's write lock).
    pub fn update(&mut self, response: &Value) -> BoltResult<()> {
        let ttl = response
            .value_by_key("ttl")
            .and_then(Value::as_integer)
            .ok_or(RoutingError::UnexpectedDiscoveryResponse)?;
        if ttl < 0 {
            return Err(RoutingError::UnexpectedDiscoveryResponse.into());
        }
        let servers = response
            .value_by_key("servers")
            .and_then(Value::as_list)
            .ok_or(RoutingError::UnexpectedDiscoveryResponse)?;

        let mut readers = AddressSet::new();
        let mut writers = AddressSet::new();
        let mut routers = AddressSet::new();

        for server in servers {
            let role = server
                .value_by_key("role")
                .and_then(Value::as_string)
                .ok_or(RoutingError::UnexpectedDiscoveryResponse)?;
            let addresses = server
                .value_by_key("addresses")
                .and_then(Value::as_list)
                .ok_or(RoutingError::UnexpectedDiscoveryResponse)?;

            let target = match role {
                "READ" => &mut readers,
                "WRITE" => &mut writers,
                "ROUTE" => &mut routers,
                _ => return Err(RoutingError::UnexpectedDiscoveryResponse.into()),
            };
            for entry in addresses {
                let text = entry.as_string().ok_or(RoutingError::UnexpectedDiscoveryResponse)?;
                let address = Address::parse(text).ok_or(RoutingError::UnexpectedDiscoveryResponse)?;
                target.add(address);
            }
        }

        self.readers.replace(&readers);
        self.writers.replace(&writers);
        self.routers.replace(&routers);
        self.last_updated_millis = time::timestamp_millis();
        self.expires_at_millis = self.last_updated_millis + (ttl as u64) * 1000;
        Ok(())
    }

    /// Drop a member from every role. It will be rediscovered by the
    /// next refresh if still alive.
    pub fn forget_server(&mut self, address: &Address) {
        self.readers.remove(address);
        self.writers.remove(address);
        self.routers.remove(address);
    }

    /// Drop a member from the writers only; it may still serve reads
    /// and routing until the next refresh.
    pub fn forget_writer(&mut self, address: &Address) {
        self.writers.remove(address);
    }

    /// True when the address appears in any role.
    pub fn knows(&self, address: &Address) -> bool {
        self.readers.contains(address) || self.writers.contains(address) || self.routers.contains(address)
    }
}

/// Build a discovery response value, shared by the tests here and by
/// the routing pool's.
#[cfg(test)]
pub(crate) fn discovery_response(
    ttl: i64,
    readers: &[&str],
    writers: &[&str],
    routers: &[&str],
) -> Value {
    let role_entry = |role: &str, addresses: &[&str]| {
        Value::dictionary_of(vec![
            ("role", Value::from(role)),
            ("addresses", Value::List(addresses.iter().map(|a| Value::from(*a)).collect())),
        ])
    };
    Value::dictionary_of(vec![
        ("ttl", Value::Integer(ttl)),
        (
            "servers",
            Value::list_of(vec![
                role_entry("READ", readers),
                role_entry("WRITE", writers),
                role_entry("ROUTE", routers),
            ]),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_populates_sets() {
        let mut table = RoutingTable::new();
        let response = discovery_response(
            30,
            &["reader-1:7687", "reader-2:7687"],
            &["writer-1:7687"],
            &["router-1:7687", "router-2:7687"],
        );
        table.update(&response).unwrap();

        assert_eq!(table.readers.len(), 2);
        assert_eq!(table.writers.len(), 1);
        assert_eq!(table.routers.len(), 2);
        assert_eq!(table.readers.get(0).unwrap(), &Address::new("reader-1", "7687"));
        assert_eq!(table.expires_at_millis, table.last_updated_millis + 30000);
        assert!(!table.is_expired(AccessMode::Read));
        assert!(!table.is_expired(AccessMode::Write));
    }

    #[test]
    fn test_update_replaces_previous_sets() {
        let mut table = RoutingTable::new();
        table
            .update(&discovery_response(300, &["old:1"], &["old:2"], &["old:3"]))
            .unwrap();
        table
            .update(&discovery_response(300, &["new:1"], &["new:2"], &["new:3"]))
            .unwrap();

        assert_eq!(table.readers.len(), 1);
        assert!(table.readers.contains(&Address::new("new", "1")));
        assert!(!table.knows(&Address::new("old", "1")));
    }

    #[test]
    fn test_expiry_conditions() {
        let mut table = RoutingTable::new();
        // Empty table is expired for both modes.
        assert!(table.is_expired(AccessMode::Read));
        assert!(table.is_expired(AccessMode::Write));

        table
            .update(&discovery_response(300, &["r:1"], &[], &["x:1"]))
            .unwrap();
        // No writers: expired for writes only.
        assert!(!table.is_expired(AccessMode::Read));
        assert!(table.is_expired(AccessMode::Write));

        // Lapsed TTL expires both.
        table.expires_at_millis = 0;
        assert!(table.is_expired(AccessMode::Read));
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let mut table = RoutingTable::new();
        table
            .update(&discovery_response(0, &["r:1"], &["w:1"], &["x:1"]))
            .unwrap();
        assert_eq!(table.expires_at_millis, table.last_updated_millis);
        assert!(table.is_expired(AccessMode::Read));
    }

    #[test]
    fn test_malformed_responses_rejected() {
        let mut table = RoutingTable::new();

        let missing_ttl = Value::dictionary_of(vec![("servers", Value::list_of(vec![]))]);
        assert!(table.update(&missing_ttl).is_err());

        let bad_role = Value::dictionary_of(vec![
            ("ttl", Value::Integer(30)),
            (
                "servers",
                Value::list_of(vec![Value::dictionary_of(vec![
                    ("role", Value::from("LEADER")),
                    ("addresses", Value::list_of(vec![Value::from("a:1")])),
                ])]),
            ),
        ]);
        assert!(table.update(&bad_role).is_err());

        let unparsable_address =
            discovery_response(30, &["no-port"], &[], &["x:1"]);
        assert!(table.update(&unparsable_address).is_err());
    }

    #[test]
    fn test_forget_semantics() {
        let mut table = RoutingTable::new();
        table
            .update(&discovery_response(
                300,
                &["a:1", "b:1"],
                &["a:1"],
                &["a:1", "c:1"],
            ))
            .unwrap();

        table.forget_writer(&Address::new("a", "1"));
        assert!(table.writers.is_empty());
        assert!(table.readers.contains(&Address::new("a", "1")));
        assert!(table.routers.contains(&Address::new("a", "1")));

        table.forget_server(&Address::new("a", "1"));
        assert!(!table.knows(&Address::new("a", "1")));
        assert!(table.readers.contains(&Address::new("b", "1")));
        assert!(table.routers.contains(&Address::new("c", "1")));
    }
}
