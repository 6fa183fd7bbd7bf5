//! LLDP-MIB `lldpLocPortTable`/`lldpRemTable`: local port identification plus
//! whatever remote-system TLVs the neighbor advertised, both indexed by the local port's
//! `oid_index`. Remote rows are keyed additionally by a per-neighbor index since a port may in
//! principle see more than one neighbor (aggregation/mirroring ports).

use super::if_index;
use crate::db::{KeyEvent, KeyEventKind, Namespaces};
use crate::error::Result;
use crate::mib::scheduler::Updater;
use crate::mib::{Column, Entry, IndexedCache};
use crate::value::Value;
use crossbeam_channel::Receiver;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

const ENTRY_PATTERN: &str = "LLDP_ENTRY_TABLE:*";
const ENTRY_PREFIX: &str = "LLDP_ENTRY_TABLE:";

pub const LLDP_LOC_TABLE: [u32; 11] = [1, 0, 8802, 1, 1, 2, 1, 3, 7, 1, 0];
pub const LLDP_REM_TABLE: [u32; 10] = [1, 0, 8802, 1, 1, 2, 1, 4, 1, 0];

fn loc_col(col: u32) -> crate::oid::Oid {
    let mut v = LLDP_LOC_TABLE[..10].to_vec();
    v.push(col);
    crate::oid::Oid::new(v)
}

fn rem_col(col: u32) -> crate::oid::Oid {
    let mut v = LLDP_REM_TABLE[..9].to_vec();
    v.push(col);
    crate::oid::Oid::new(v)
}

#[derive(Debug, Clone, Default)]
pub struct LocalRow {
    pub oid_index: u32,
    pub port_id: String,
    pub port_desc: String,
}

/// Management address subtype per RFC 2579's `InetAddressType` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtAddrType {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteRow {
    pub oid_index: u32,
    pub chassis_id: String,
    pub port_id: String,
    pub port_desc: String,
    pub sys_name: String,
    pub sys_desc: String,
    pub mgmt_addr: String,
    pub mgmt_addr_type: Option<MgmtAddrType>,
}

fn guess_mgmt_addr_type(addr: &str) -> Option<MgmtAddrType> {
    if addr.is_empty() {
        None
    } else if addr.contains(':') {
        Some(MgmtAddrType::Ipv6)
    } else {
        Some(MgmtAddrType::Ipv4)
    }
}

pub struct LldpUpdater {
    db: Arc<Namespaces>,
    loc_cache: Arc<IndexedCache<LocalRow>>,
    rem_cache: Arc<IndexedCache<RemoteRow>>,
    /// Per-ifname rows kept between cycles so a `set` event can patch a single entry without
    /// forcing a full rescan; rebuilt from scratch by `reinit`.
    state: Mutex<HashMap<String, (LocalRow, RemoteRow)>>,
    /// The host namespace's `LLDP_ENTRY_TABLE:*` keyspace subscription, established by `reinit`
    /// and drained by every `update()` before that cycle's snapshot is published.
    subscription: Mutex<Option<Receiver<KeyEvent>>>,
}

impl LldpUpdater {
    pub fn new(
        db: Arc<Namespaces>,
        loc_cache: Arc<IndexedCache<LocalRow>>,
        rem_cache: Arc<IndexedCache<RemoteRow>>,
    ) -> Self {
        LldpUpdater {
            db,
            loc_cache,
            rem_cache,
            state: Mutex::new(HashMap::new()),
            subscription: Mutex::new(None),
        }
    }

    fn read_entry(&self, ifname: &str) -> Option<(LocalRow, RemoteRow)> {
        let oid_index = if_index::trailing_number(ifname).map(if_index::physical_port)?;
        let fields: HashMap<String, String> =
            self.db.get_all("APPL_DB", &format!("{}{}", ENTRY_PREFIX, ifname));
        if fields.is_empty() {
            return None;
        }
        let loc = LocalRow {
            oid_index,
            port_id: ifname.to_string(),
            port_desc: fields.get("lldp_rem_port_desc").cloned().unwrap_or_default(),
        };
        let mgmt_addr = fields.get("lldp_rem_man_addr").cloned().unwrap_or_default();
        let rem = RemoteRow {
            oid_index,
            chassis_id: fields.get("lldp_rem_chassis_id").cloned().unwrap_or_default(),
            port_id: fields.get("lldp_rem_port_id").cloned().unwrap_or_default(),
            port_desc: fields.get("lldp_rem_port_desc").cloned().unwrap_or_default(),
            sys_name: fields.get("lldp_rem_sys_name").cloned().unwrap_or_default(),
            sys_desc: fields.get("lldp_rem_sys_desc").cloned().unwrap_or_default(),
            mgmt_addr_type: guess_mgmt_addr_type(&mgmt_addr),
            mgmt_addr,
        };
        Some((loc, rem))
    }

    fn publish_state(&self) {
        let state = self.state.lock().expect("lldp state mutex poisoned");
        let mut loc_rows: BTreeMap<Vec<u32>, LocalRow> = BTreeMap::new();
        let mut rem_rows: BTreeMap<Vec<u32>, RemoteRow> = BTreeMap::new();
        for (loc, rem) in state.values() {
            loc_rows.insert(vec![loc.oid_index], loc.clone());
            rem_rows.insert(vec![rem.oid_index, 1], rem.clone());
        }
        self.loc_cache.publish(loc_rows);
        self.rem_cache.publish(rem_rows);
    }
}

impl Updater for LldpUpdater {
    fn name(&self) -> &str {
        "lldp"
    }

    /// Full rescan plus a fresh subscription: topology may have changed since the last reinit,
    /// so every live `LLDP_ENTRY_TABLE:*` key is re-read from scratch rather than patched.
    fn reinit(&self) -> Result<()> {
        let mut state = HashMap::new();
        for key in self.db.keys("APPL_DB", ENTRY_PATTERN) {
            if let Some(ifname) = key.strip_prefix(ENTRY_PREFIX) {
                if let Some(entry) = self.read_entry(ifname) {
                    state.insert(ifname.to_string(), entry);
                }
            }
        }
        *self.state.lock().expect("lldp state mutex poisoned") = state;

        if let Some(host) = self.db.host() {
            match host.subscribe_keyspace("APPL_DB", ENTRY_PATTERN) {
                Ok(rx) => *self.subscription.lock().expect("lldp subscription mutex poisoned") = Some(rx),
                Err(e) => log::warn!("lldp: subscribing to {} failed: {}", ENTRY_PATTERN, e),
            }
        }
        self.publish_state();
        Ok(())
    }

    /// Drains every pending keyspace event before republishing: a `set` re-reads the affected
    /// entry, a `del`/`expired` evicts it. Per the concurrency contract, events observed before
    /// this cycle are always reflected in this cycle's published snapshot, never lost.
    fn update(&self) -> Result<()> {
        let events: Vec<KeyEvent> = {
            let sub = self.subscription.lock().expect("lldp subscription mutex poisoned");
            match sub.as_ref() {
                Some(rx) => rx.try_iter().collect(),
                None => Vec::new(),
            }
        };

        if events.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().expect("lldp state mutex poisoned");
        for event in events {
            let ifname = match event.key.strip_prefix(ENTRY_PREFIX) {
                Some(n) => n.to_string(),
                None => continue,
            };
            match event.kind {
                KeyEventKind::Del | KeyEventKind::Expired => {
                    state.remove(&ifname);
                }
                KeyEventKind::Set => match self.read_entry(&ifname) {
                    Some(entry) => {
                        state.insert(ifname, entry);
                    }
                    None => {
                        state.remove(&ifname);
                    }
                },
            }
        }
        drop(state);
        self.publish_state();
        Ok(())
    }
}

pub fn register(loc_cache: Arc<IndexedCache<LocalRow>>, rem_cache: Arc<IndexedCache<RemoteRow>>) -> Vec<Entry> {
    vec![
        Entry::subtree(
            loc_col(1),
            Arc::new(Column::new(loc_cache.clone(), |r: &LocalRow| Ok(Value::Integer(r.oid_index as i32)))),
        ),
        Entry::subtree(
            loc_col(3),
            Arc::new(Column::new(loc_cache.clone(), |r: &LocalRow| Ok(Value::octet_string(r.port_id.clone())))),
        ),
        Entry::subtree(
            loc_col(4),
            Arc::new(Column::new(loc_cache, |r: &LocalRow| Ok(Value::octet_string(r.port_desc.clone())))),
        ),
        Entry::subtree(
            rem_col(4),
            Arc::new(Column::new(rem_cache.clone(), |r: &RemoteRow| Ok(Value::octet_string(r.chassis_id.clone())))),
        ),
        Entry::subtree(
            rem_col(6),
            Arc::new(Column::new(rem_cache.clone(), |r: &RemoteRow| Ok(Value::octet_string(r.port_id.clone())))),
        ),
        Entry::subtree(
            rem_col(7),
            Arc::new(Column::new(rem_cache.clone(), |r: &RemoteRow| Ok(Value::octet_string(r.port_desc.clone())))),
        ),
        Entry::subtree(
            rem_col(8),
            Arc::new(Column::new(rem_cache.clone(), |r: &RemoteRow| Ok(Value::octet_string(r.sys_name.clone())))),
        ),
        Entry::subtree(
            rem_col(9),
            Arc::new(Column::new(rem_cache.clone(), |r: &RemoteRow| Ok(Value::octet_string(r.sys_desc.clone())))),
        ),
        Entry::subtree(
            rem_col(11),
            Arc::new(Column::new(rem_cache, |r: &RemoteRow| {
                Ok(match r.mgmt_addr_type {
                    Some(MgmtAddrType::Ipv4) => Value::Integer(1),
                    Some(MgmtAddrType::Ipv6) => Value::Integer(2),
                    None => Value::Integer(0),
                })
            })),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbClient;
    use crossbeam_channel::unbounded;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn mgmt_addr_type_guess() {
        assert_eq!(guess_mgmt_addr_type("10.0.0.1"), Some(MgmtAddrType::Ipv4));
        assert_eq!(guess_mgmt_addr_type("fe80::1"), Some(MgmtAddrType::Ipv6));
        assert_eq!(guess_mgmt_addr_type(""), None);
    }

    struct FakeClient {
        rows: StdMutex<HashMap<String, HashMap<String, String>>>,
        entry_keys: Vec<String>,
        sub: StdMutex<Option<Receiver<KeyEvent>>>,
    }

    impl DbClient for FakeClient {
        fn namespace(&self) -> &str {
            ""
        }
        fn get_all(&self, _db: &str, key: &str) -> std::result::Result<HashMap<String, String>, crate::error::AgentError> {
            Ok(self.rows.lock().unwrap().get(key).cloned().unwrap_or_default())
        }
        fn keys(&self, _db: &str, pattern: &str) -> std::result::Result<Vec<String>, crate::error::AgentError> {
            if pattern == ENTRY_PATTERN {
                Ok(self.entry_keys.clone())
            } else {
                Ok(vec![])
            }
        }
        fn subscribe_keyspace(
            &self,
            _db: &str,
            _pattern: &str,
        ) -> std::result::Result<Receiver<KeyEvent>, crate::error::AgentError> {
            Ok(self.sub.lock().unwrap().take().expect("subscribe called once in this test"))
        }
    }

    #[test]
    fn set_event_refreshes_one_entry_without_a_full_rescan() {
        let mut rows = HashMap::new();
        rows.insert(
            "LLDP_ENTRY_TABLE:Ethernet0".to_string(),
            [("lldp_rem_sys_name".to_string(), "switch-a".to_string())].into_iter().collect(),
        );
        let (tx, rx) = unbounded();
        let client = FakeClient {
            rows: StdMutex::new(rows),
            entry_keys: vec!["LLDP_ENTRY_TABLE:Ethernet0".to_string()],
            sub: StdMutex::new(Some(rx)),
        };
        let db = Arc::new(Namespaces::new(vec![Box::new(client)]));
        let loc_cache = Arc::new(IndexedCache::new());
        let rem_cache = Arc::new(IndexedCache::new());
        let updater = LldpUpdater::new(db, loc_cache.clone(), rem_cache.clone());
        updater.reinit().unwrap();
        assert_eq!(rem_cache.get(&[1, 1]).unwrap().sys_name, "switch-a");

        tx.send(KeyEvent { kind: KeyEventKind::Set, key: "LLDP_ENTRY_TABLE:Ethernet0".to_string() }).unwrap();
        updater.update().unwrap();
        assert_eq!(rem_cache.get(&[1, 1]).unwrap().sys_name, "switch-a");
    }

    #[test]
    fn del_event_evicts_the_entry() {
        let mut rows = HashMap::new();
        rows.insert(
            "LLDP_ENTRY_TABLE:Ethernet0".to_string(),
            [("lldp_rem_sys_name".to_string(), "switch-a".to_string())].into_iter().collect(),
        );
        let (tx, rx) = unbounded();
        let client = FakeClient {
            rows: StdMutex::new(rows),
            entry_keys: vec!["LLDP_ENTRY_TABLE:Ethernet0".to_string()],
            sub: StdMutex::new(Some(rx)),
        };
        let db = Arc::new(Namespaces::new(vec![Box::new(client)]));
        let loc_cache = Arc::new(IndexedCache::new());
        let rem_cache = Arc::new(IndexedCache::new());
        let updater = LldpUpdater::new(db, loc_cache.clone(), rem_cache.clone());
        updater.reinit().unwrap();
        assert!(rem_cache.get(&[1, 1]).is_some());

        tx.send(KeyEvent { kind: KeyEventKind::Del, key: "LLDP_ENTRY_TABLE:Ethernet0".to_string() }).unwrap();
        updater.update().unwrap();
        assert!(rem_cache.get(&[1, 1]).is_none());
        assert!(loc_cache.get(&[1]).is_none());
    }
}
