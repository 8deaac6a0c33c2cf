//! In-memory network, endpoint and bridge tables backed by the ledger.
//!
//! # Lock order
//!
//! Each table has its own mutex. Any path that holds more than one of them
//! acquires them in the order **networks → endpoints → bridges** and never the
//! other way round. Methods that take only the bridge lock (`next_bridge_id`,
//! `next_interface_index`) may therefore be called while a network or endpoint
//! guard is held, but nothing may touch `networks` or `endpoints` while the
//! bridge guard is held.
//!
//! Ledger writes happen after the in-memory change. A failed write is logged
//! and otherwise ignored, so memory may run ahead of the ledger until the next
//! restart, which rebuilds everything from the ledger alone.

use ipnet::IpNet;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ledger::{Ledger, LedgerError};
use crate::record::{
    self, BridgeRecord, CodecError, CounterRecord, EndpointRecord, NetworkRecord,
};

pub const TABLE_GLOBAL: &str = "global";
pub const TABLE_NETWORKS: &str = "networks";
pub const TABLE_ENDPOINTS: &str = "endpoints";
pub const TABLE_BRIDGES: &str = "bridges";

const KEY_INTERFACE_COUNTER: &str = "interface_counter";
const KEY_BRIDGE_COUNTER: &str = "bridge_counter";

/// First bridge sequence number handed out on a fresh ledger.
pub const FIRST_BRIDGE_ID: u64 = 1;
/// First dataplane interface index handed out on a fresh ledger.
pub const FIRST_INTERFACE_INDEX: u64 = 100;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Corrupt entry {table}/{key}: {source}")]
    Codec {
        table: String,
        key: String,
        #[source]
        source: CodecError,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

struct BridgeTable {
    next_bridge: u64,
    next_interface: u64,
    entries: HashMap<String, BridgeRecord>,
}

pub struct StateStore {
    ledger: Arc<Ledger>,
    networks: Mutex<HashMap<String, NetworkRecord>>,
    endpoints: Mutex<HashMap<String, EndpointRecord>>,
    bridges: Mutex<BridgeTable>,
}

fn load_table<T: serde::de::DeserializeOwned>(
    ledger: &Ledger,
    table: &str,
) -> Result<HashMap<String, T>> {
    let mut entries = HashMap::new();
    ledger.for_each(table, |key, value| {
        let rec = record::decode(value).map_err(|source| StateError::Codec {
            table: table.to_string(),
            key: key.to_string(),
            source,
        })?;
        entries.insert(key.to_string(), rec);
        Ok::<_, StateError>(())
    })?;
    Ok(entries)
}

fn load_counter(ledger: &Ledger, key: &str) -> Result<Option<u64>> {
    let Some(bytes) = ledger.get(TABLE_GLOBAL, key)? else {
        return Ok(None);
    };
    let counter: CounterRecord = record::decode(&bytes).map_err(|source| StateError::Codec {
        table: TABLE_GLOBAL.to_string(),
        key: key.to_string(),
        source,
    })?;
    Ok(Some(counter.next))
}

impl StateStore {
    /// Rebuild all tables from the ledger, creating missing tables first.
    pub fn load(ledger: Arc<Ledger>) -> Result<Self> {
        ledger.init_tables(&[TABLE_GLOBAL, TABLE_NETWORKS, TABLE_ENDPOINTS, TABLE_BRIDGES])?;

        let networks: HashMap<String, NetworkRecord> = load_table(&ledger, TABLE_NETWORKS)?;
        let endpoints: HashMap<String, EndpointRecord> = load_table(&ledger, TABLE_ENDPOINTS)?;
        let bridges: HashMap<String, BridgeRecord> = load_table(&ledger, TABLE_BRIDGES)?;

        // A counter write may have failed after a record write succeeded, so
        // never resume below anything a stored record already uses.
        let next_interface = endpoints
            .values()
            .map(|e| e.interface_index + 1)
            .chain(load_counter(&ledger, KEY_INTERFACE_COUNTER)?)
            .fold(FIRST_INTERFACE_INDEX, u64::max);
        let next_bridge = bridges
            .values()
            .map(|b| b.sequence + 1)
            .chain(load_counter(&ledger, KEY_BRIDGE_COUNTER)?)
            .fold(FIRST_BRIDGE_ID, u64::max);

        info!(
            networks = networks.len(),
            endpoints = endpoints.len(),
            bridges = bridges.len(),
            next_interface,
            next_bridge,
            "Loaded state from ledger"
        );

        Ok(Self {
            ledger,
            networks: Mutex::new(networks),
            endpoints: Mutex::new(endpoints),
            bridges: Mutex::new(BridgeTable {
                next_bridge,
                next_interface,
                entries: bridges,
            }),
        })
    }

    fn persist<T: Serialize>(&self, table: &str, key: &str, value: &T) {
        let result = record::encode(value)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                self.ledger
                    .put(table, key, &bytes)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            error!(table, key, error = %e, "Unable to update ledger");
        }
    }

    fn unpersist(&self, table: &str, key: &str) {
        if let Err(e) = self.ledger.delete(table, key) {
            error!(table, key, error = %e, "Unable to update ledger");
        }
    }

    // === Networks ===

    /// Record a network and allocate its bridge sequence number.
    ///
    /// An existing entry with the same ID is replaced.
    pub fn create_network_entry(
        &self,
        network_id: &str,
        bridge: &str,
        gateway: IpNet,
    ) -> (NetworkRecord, BridgeRecord) {
        let mut networks = self.networks.lock().unwrap();

        let record = NetworkRecord {
            bridge: bridge.to_string(),
            gateway,
        };
        if networks
            .insert(network_id.to_string(), record.clone())
            .is_some()
        {
            warn!(network_id, "Replacing existing network entry");
        }
        self.persist(TABLE_NETWORKS, network_id, &record);

        let bridge_record = self.next_bridge_id(network_id);
        (record, bridge_record)
    }

    /// Remove a network and its bridge record. Returns `None` if unknown.
    pub fn delete_network_entry(&self, network_id: &str) -> Option<NetworkRecord> {
        let mut networks = self.networks.lock().unwrap();
        let record = networks.remove(network_id)?;
        self.unpersist(TABLE_NETWORKS, network_id);

        {
            let endpoints = self.endpoints.lock().unwrap();
            let attached: Vec<&str> = endpoints
                .iter()
                .filter(|(_, e)| e.network_id == network_id)
                .map(|(id, _)| id.as_str())
                .collect();
            if !attached.is_empty() {
                warn!(network_id, ?attached, "Deleting network with attached endpoints");
            }
        }

        let mut bridges = self.bridges.lock().unwrap();
        bridges.entries.remove(network_id);
        self.unpersist(TABLE_BRIDGES, network_id);

        Some(record)
    }

    pub fn lookup_network(&self, network_id: &str) -> Option<NetworkRecord> {
        self.networks.lock().unwrap().get(network_id).cloned()
    }

    pub fn lookup_bridge(&self, network_id: &str) -> Option<BridgeRecord> {
        self.bridges.lock().unwrap().entries.get(network_id).copied()
    }

    // === Endpoints ===

    /// Record a provisioned endpoint. Returns `false` and leaves the table
    /// untouched if the ID is already present.
    pub fn create_endpoint_entry(&self, endpoint_id: &str, record: EndpointRecord) -> bool {
        let mut endpoints = self.endpoints.lock().unwrap();
        if endpoints.contains_key(endpoint_id) {
            return false;
        }
        self.persist(TABLE_ENDPOINTS, endpoint_id, &record);
        endpoints.insert(endpoint_id.to_string(), record);
        true
    }

    pub fn delete_endpoint_entry(&self, endpoint_id: &str) -> Option<EndpointRecord> {
        let mut endpoints = self.endpoints.lock().unwrap();
        let record = endpoints.remove(endpoint_id)?;
        self.unpersist(TABLE_ENDPOINTS, endpoint_id);
        Some(record)
    }

    pub fn lookup_endpoint(&self, endpoint_id: &str) -> Option<EndpointRecord> {
        self.endpoints.lock().unwrap().get(endpoint_id).cloned()
    }

    // === Counters ===

    /// Assign the next bridge sequence number to `network_id`.
    pub fn next_bridge_id(&self, network_id: &str) -> BridgeRecord {
        let mut bridges = self.bridges.lock().unwrap();
        let record = BridgeRecord {
            sequence: bridges.next_bridge,
        };
        bridges.next_bridge += 1;
        bridges.entries.insert(network_id.to_string(), record);

        self.persist(TABLE_BRIDGES, network_id, &record);
        self.persist(
            TABLE_GLOBAL,
            KEY_BRIDGE_COUNTER,
            &CounterRecord {
                next: bridges.next_bridge,
            },
        );
        debug!(network_id, sequence = record.sequence, "Allocated bridge ID");
        record
    }

    pub fn next_interface_index(&self) -> u64 {
        let mut bridges = self.bridges.lock().unwrap();
        let index = bridges.next_interface;
        bridges.next_interface += 1;

        self.persist(
            TABLE_GLOBAL,
            KEY_INTERFACE_COUNTER,
            &CounterRecord {
                next: bridges.next_interface,
            },
        );
        debug!(index, "Allocated interface index");
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> (Arc<Ledger>, StateStore) {
        let ledger = Arc::new(Ledger::open(dir.path().join("ledger.redb")).unwrap());
        let store = StateStore::load(Arc::clone(&ledger)).unwrap();
        (ledger, store)
    }

    fn gw(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn endpoint(network_id: &str, ip: &str, index: u64) -> EndpointRecord {
        EndpointRecord {
            network_id: network_id.to_string(),
            address: format!("{ip}/24"),
            port_name: ip.to_string(),
            interface_index: index,
        }
    }

    #[test]
    fn fresh_store_starts_counters_at_floor() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open_store(&dir);

        assert_eq!(store.next_interface_index(), FIRST_INTERFACE_INDEX);
        let (_, bridge) = store.create_network_entry("net1", "br0", gw("10.0.0.1/24"));
        assert_eq!(bridge.sequence, FIRST_BRIDGE_ID);
    }

    #[test]
    fn network_lookup_is_stable_until_delete() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open_store(&dir);

        store.create_network_entry("net1", "br0", gw("10.0.0.1/24"));
        store.create_network_entry("net2", "br0", gw("10.1.0.1/16"));

        for _ in 0..3 {
            let rec = store.lookup_network("net1").unwrap();
            assert_eq!(rec.bridge, "br0");
            assert_eq!(rec.gateway, gw("10.0.0.1/24"));
        }

        let deleted = store.delete_network_entry("net1").unwrap();
        assert_eq!(deleted.gateway, gw("10.0.0.1/24"));
        assert!(store.lookup_network("net1").is_none());
        assert!(store.lookup_bridge("net1").is_none());
        assert!(store.lookup_network("net2").is_some());
    }

    #[test]
    fn delete_unknown_network_returns_none() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open_store(&dir);
        assert!(store.delete_network_entry("missing").is_none());
    }

    #[test]
    fn recreating_network_overwrites_and_takes_new_bridge() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open_store(&dir);

        let (_, b1) = store.create_network_entry("net1", "br0", gw("10.0.0.1/24"));
        let (_, b2) = store.create_network_entry("net1", "br0", gw("10.9.0.1/24"));

        assert!(b2.sequence > b1.sequence);
        assert_eq!(store.lookup_network("net1").unwrap().gateway, gw("10.9.0.1/24"));
        assert_eq!(store.lookup_bridge("net1").unwrap(), b2);
    }

    #[test]
    fn counters_never_reuse_across_create_delete() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open_store(&dir);

        let mut bridge_ids = Vec::new();
        let mut indices = Vec::new();
        for round in 0..5 {
            let id = format!("net{}", round % 2);
            let (_, b) = store.create_network_entry(&id, "br0", gw("10.0.0.1/24"));
            bridge_ids.push(b.sequence);
            indices.push(store.next_interface_index());
            store.delete_network_entry(&id);
        }

        assert!(bridge_ids.windows(2).all(|w| w[0] < w[1]));
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn endpoint_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open_store(&dir);

        assert!(store.create_endpoint_entry("ep1", endpoint("net1", "10.0.0.5", 100)));
        assert!(!store.create_endpoint_entry("ep1", endpoint("net1", "10.0.0.6", 101)));
        assert_eq!(store.lookup_endpoint("ep1").unwrap().port_name, "10.0.0.5");

        assert!(store.delete_endpoint_entry("ep1").is_some());
        assert!(store.delete_endpoint_entry("ep1").is_none());
    }

    #[test]
    fn reload_rebuilds_identical_records() {
        let dir = TempDir::new().unwrap();
        let (ledger, store) = open_store(&dir);

        let (net, bridge) = store.create_network_entry("net1", "br0", gw("10.0.0.1/24"));
        let ep = endpoint("net1", "10.0.0.5", store.next_interface_index());
        store.create_endpoint_entry("ep1", ep.clone());
        drop(store);

        let reloaded = StateStore::load(Arc::clone(&ledger)).unwrap();
        let net2 = reloaded.lookup_network("net1").unwrap();
        assert_eq!(
            record::encode(&net2).unwrap(),
            record::encode(&net).unwrap()
        );
        assert_eq!(
            ledger.get(TABLE_NETWORKS, "net1").unwrap().unwrap(),
            record::encode(&net).unwrap()
        );
        assert_eq!(reloaded.lookup_endpoint("ep1").unwrap(), ep);
        assert_eq!(reloaded.lookup_bridge("net1").unwrap(), bridge);
    }

    #[test]
    fn reload_resumes_counters() {
        let dir = TempDir::new().unwrap();
        let (ledger, store) = open_store(&dir);

        store.create_network_entry("net1", "br0", gw("10.0.0.1/24"));
        store.create_network_entry("net2", "br0", gw("10.1.0.1/24"));
        let last_index = (0..3).map(|_| store.next_interface_index()).last().unwrap();
        drop(store);

        let reloaded = StateStore::load(ledger).unwrap();
        assert_eq!(reloaded.next_interface_index(), last_index + 1);
        assert_eq!(reloaded.next_bridge_id("net3").sequence, FIRST_BRIDGE_ID + 2);
    }

    #[test]
    fn reload_never_resumes_below_stored_records() {
        let dir = TempDir::new().unwrap();
        let (ledger, store) = open_store(&dir);

        // Endpoint persisted with an index the counter never reached.
        store.create_endpoint_entry("ep1", endpoint("net1", "10.0.0.5", 250));
        drop(store);

        let reloaded = StateStore::load(ledger).unwrap();
        assert_eq!(reloaded.next_interface_index(), 251);
    }

    #[test]
    fn deleted_entries_stay_deleted_after_reload() {
        let dir = TempDir::new().unwrap();
        let (ledger, store) = open_store(&dir);

        store.create_network_entry("net1", "br0", gw("10.0.0.1/24"));
        store.create_endpoint_entry("ep1", endpoint("net1", "10.0.0.5", 100));
        store.delete_endpoint_entry("ep1");
        store.delete_network_entry("net1");
        drop(store);

        let reloaded = StateStore::load(ledger).unwrap();
        assert!(reloaded.lookup_network("net1").is_none());
        assert!(reloaded.lookup_bridge("net1").is_none());
        assert!(reloaded.lookup_endpoint("ep1").is_none());
    }

    #[test]
    fn corrupt_entry_fails_load() {
        let dir = TempDir::new().unwrap();
        let (ledger, store) = open_store(&dir);
        drop(store);

        ledger.put(TABLE_NETWORKS, "bad", b"not json").unwrap();
        match StateStore::load(ledger) {
            Err(StateError::Codec { table, key, .. }) => {
                assert_eq!(table, TABLE_NETWORKS);
                assert_eq!(key, "bad");
            }
            other => panic!("expected codec error, got {:?}", other.err()),
        }
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open_store(&dir);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    for i in 0..10 {
                        got.push(store.next_interface_index());
                        let id = format!("net-{t}-{i}");
                        store.create_network_entry(&id, "br0", "10.0.0.1/24".parse().unwrap());
                    }
                    got
                })
            })
            .collect();

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());

        let bridge_ids: HashSet<_> = (0..8)
            .flat_map(|t| (0..10).map(move |i| format!("net-{t}-{i}")))
            .map(|id| store.lookup_bridge(&id).unwrap().sequence)
            .collect();
        assert_eq!(bridge_ids.len(), 80);
    }
}
