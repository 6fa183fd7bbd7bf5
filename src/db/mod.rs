//! DB client and multi-namespace fan-out. `DbClient` is the abstract contract every
//! updater programs against; [`redis_client::RedisClient`] is the one concrete backend
//! (these in-memory stores are, in practice, Redis instances), and [`Namespaces`] fans a call
//! out across every configured backend and merges the results.

pub mod redis_client;

use crate::error::AgentError;
use std::collections::HashMap;

/// One keyspace-change event, as delivered by `subscribe_keyspace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Set,
    Del,
    Expired,
}

/// The abstract backend contract. Implementations connect lazily and may be asked to
/// reconnect; a transient failure degrades to an empty result for that cycle rather than
/// propagating past the updater boundary (`backend_unavailable`).
pub trait DbClient: Send + Sync {
    /// Empty-string label for the host namespace; non-empty labels name additional ASIC/VM
    /// namespaces on a multi-ASIC device.
    fn namespace(&self) -> &str;

    fn get_all(&self, db_name: &str, key: &str) -> Result<HashMap<String, String>, AgentError>;

    /// Never returns null; an empty `Vec` means "no match".
    fn keys(&self, db_name: &str, pattern: &str) -> Result<Vec<String>, AgentError>;

    /// Registers a keyspace-notification subscription and returns a channel of events. The
    /// subscription, and its background receive loop, are released when the returned guard (or
    /// the client itself) is dropped.
    fn subscribe_keyspace(
        &self,
        db_name: &str,
        pattern: &str,
    ) -> Result<crossbeam_channel::Receiver<KeyEvent>, AgentError>;
}

/// One client per configured backend namespace, host namespace first. Fan-out primitives
/// reproduce the deployed fleet's merge semantics exactly, including its acknowledged
/// last-writer-wins quirk for namespace disagreement (see DESIGN.md).
pub struct Namespaces {
    clients: Vec<Box<dyn DbClient>>,
}

impl Namespaces {
    /// `clients[0]` must be the host namespace (empty `namespace()` label); callers build the
    /// list in that order.
    pub fn new(clients: Vec<Box<dyn DbClient>>) -> Self {
        Namespaces { clients }
    }

    pub fn host(&self) -> Option<&dyn DbClient> {
        self.clients.first().map(|b| b.as_ref())
    }

    pub fn all(&self) -> impl Iterator<Item = &dyn DbClient> {
        self.clients.iter().map(|b| b.as_ref())
    }

    pub fn non_host(&self) -> impl Iterator<Item = &dyn DbClient> {
        self.clients.iter().skip(1).map(|b| b.as_ref())
    }

    /// `dbs_keys`: concatenation of every backend's result, in namespace order.
    pub fn keys(&self, db_name: &str, pattern: &str) -> Vec<String> {
        let mut out = Vec::new();
        for c in self.all() {
            match c.keys(db_name, pattern) {
                Ok(mut ks) => out.append(&mut ks),
                Err(e) => log::error!("namespace {}: keys({}) failed: {}", c.namespace(), pattern, e),
            }
        }
        out
    }

    /// `dbs_get_all`: with one backend, that backend's (possibly empty) result; with several,
    /// merge every non-empty map with last-writer-wins in namespace iteration order (host
    /// first). A key entirely absent from every backend never blocks the caller — it just comes
    /// back empty.
    pub fn get_all(&self, db_name: &str, key: &str) -> HashMap<String, String> {
        if self.clients.len() == 1 {
            return self
                .clients
                .get(0)
                .and_then(|c| c.get_all(db_name, key).ok())
                .unwrap_or_default();
        }
        let mut merged = HashMap::new();
        for c in self.all() {
            match c.get_all(db_name, key) {
                Ok(m) if !m.is_empty() => merged.extend(m),
                Ok(_) => {}
                Err(e) => log::error!("namespace {}: get_all({}) failed: {}", c.namespace(), key, e),
            }
        }
        merged
    }

    /// `get_sync_d_from_all_namespace`: runs `f` against every non-host backend and merges the
    /// resulting tuples-of-maps position-wise (each backend contributes one `HashMap` per
    /// output slot; slot count is whatever `f` returns, e.g. one map of rows plus one map of
    /// their vlan resolutions).
    pub fn get_sync_d_from_all_namespace<F>(&self, slots: usize, f: F) -> Vec<HashMap<String, String>>
    where
        F: Fn(&dyn DbClient) -> Vec<HashMap<String, String>>,
    {
        let mut acc: Vec<HashMap<String, String>> = (0..slots).map(|_| HashMap::new()).collect();
        for c in self.non_host() {
            let maps = f(c);
            for (slot, m) in acc.iter_mut().zip(maps.into_iter()) {
                slot.extend(m);
            }
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeClient {
        ns: String,
        rows: Mutex<HashMap<String, HashMap<String, String>>>,
        key_list: Vec<String>,
    }

    impl DbClient for FakeClient {
        fn namespace(&self) -> &str {
            &self.ns
        }
        fn get_all(&self, _db: &str, key: &str) -> Result<HashMap<String, String>, AgentError> {
            Ok(self.rows.lock().unwrap().get(key).cloned().unwrap_or_default())
        }
        fn keys(&self, _db: &str, _pattern: &str) -> Result<Vec<String>, AgentError> {
            Ok(self.key_list.clone())
        }
        fn subscribe_keyspace(
            &self,
            _db: &str,
            _pattern: &str,
        ) -> Result<crossbeam_channel::Receiver<KeyEvent>, AgentError> {
            let (_tx, rx) = crossbeam_channel::unbounded();
            Ok(rx)
        }
    }

    fn client(ns: &str, rows: &[(&str, &[(&str, &str)])], keys: &[&str]) -> Box<dyn DbClient> {
        let mut m = HashMap::new();
        for (k, fields) in rows {
            m.insert(
                k.to_string(),
                fields.iter().map(|(f, v)| (f.to_string(), v.to_string())).collect(),
            );
        }
        Box::new(FakeClient {
            ns: ns.to_string(),
            rows: Mutex::new(m),
            key_list: keys.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn keys_concatenates_in_namespace_order() {
        let ns = Namespaces::new(vec![
            client("", &[], &["a", "b"]),
            client("asic1", &[], &["c"]),
        ]);
        assert_eq!(ns.keys("ANY", "*"), vec!["a", "b", "c"]);
    }

    #[test]
    fn keys_returns_empty_not_error_on_no_match() {
        let ns = Namespaces::new(vec![client("", &[], &[])]);
        assert_eq!(ns.keys("ANY", "nomatch*"), Vec::<String>::new());
    }

    #[test]
    fn get_all_single_backend_passthrough() {
        let ns = Namespaces::new(vec![client("", &[("k", &[("f", "v")])], &[])]);
        let got = ns.get_all("ANY", "k");
        assert_eq!(got.get("f"), Some(&"v".to_string()));
    }

    #[test]
    fn get_all_merges_with_last_writer_wins_host_first() {
        let ns = Namespaces::new(vec![
            client("", &[("k", &[("f", "host")])], &[]),
            client("asic1", &[("k", &[("f", "asic1")])], &[]),
        ]);
        // host first, then asic1 overwrites per the documented (latent-bug) LWW order
        assert_eq!(ns.get_all("ANY", "k").get("f"), Some(&"asic1".to_string()));
    }

    #[test]
    fn get_all_missing_key_never_blocks() {
        let ns = Namespaces::new(vec![
            client("", &[], &[]),
            client("asic1", &[], &[]),
        ]);
        assert!(ns.get_all("ANY", "missing").is_empty());
    }
}
