//! A [`DbClient`] backed by a real Redis connection: the "database" names each caller passes are Redis DBs
//! selected by index, keys are Redis hashes, and keyspace notifications ride Redis's own
//! `__keyspace@<db>__:<pattern>` pubsub channel (`notify-keyspace-events` must be enabled on the
//! server; that is an external deployment concern, not this crate's).

use super::{DbClient, KeyEvent, KeyEventKind};
use crate::error::AgentError;
use redis::{Client, Commands, ConnectionLike};
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;

/// Maps the symbolic DB names used throughout the MIB modules to Redis DB indices. Concrete
/// index assignment is a deployment convention; defaults mirror the host's existing db mapping.
pub fn db_index(db_name: &str) -> u8 {
    match db_name {
        "APPL_DB" => 0,
        "ASIC_DB" => 1,
        "COUNTERS_DB" => 2,
        "CONFIG_DB" => 4,
        "STATE_DB" => 6,
        "SNMP_OVERLAY_DB" => 15,
        _ => 0,
    }
}

pub struct RedisClient {
    namespace: String,
    client: Client,
    // `redis::Connection` is `!Sync`; guard it so one `RedisClient` can be shared across
    // updater threads the way the rest of the agent shares a `DbClient`.
    conn: Mutex<Option<redis::Connection>>,
}

impl RedisClient {
    pub fn connect(namespace: impl Into<String>, addr: &str) -> Result<Self, AgentError> {
        let client = Client::open(addr)
            .map_err(|e| AgentError::backend_unavailable(addr, e.to_string()))?;
        Ok(RedisClient {
            namespace: namespace.into(),
            client,
            conn: Mutex::new(None),
        })
    }

    pub fn unix_socket(namespace: impl Into<String>, path: &str) -> Result<Self, AgentError> {
        Self::connect(namespace, &format!("unix://{}", path))
    }

    fn with_connection<T>(
        &self,
        db_name: &str,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, AgentError> {
        let mut guard = self.conn.lock().expect("redis connection mutex poisoned");
        if guard.is_none() || !guard.as_mut().unwrap().check_connection() {
            let new_conn = self
                .client
                .get_connection()
                .map_err(|e| AgentError::backend_unavailable(&self.namespace, e.to_string()))?;
            *guard = Some(new_conn);
        }
        let conn = guard.as_mut().expect("connection just established");
        let _: () = redis::cmd("SELECT")
            .arg(db_index(db_name))
            .query(conn)
            .map_err(|e| AgentError::backend_unavailable(&self.namespace, e.to_string()))?;
        f(conn).map_err(|e| AgentError::backend_unavailable(&self.namespace, e.to_string()))
    }
}

impl DbClient for RedisClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn get_all(&self, db_name: &str, key: &str) -> Result<HashMap<String, String>, AgentError> {
        self.with_connection(db_name, |conn| conn.hgetall(key))
    }

    fn keys(&self, db_name: &str, pattern: &str) -> Result<Vec<String>, AgentError> {
        self.with_connection(db_name, |conn| conn.keys(pattern))
    }

    fn subscribe_keyspace(
        &self,
        db_name: &str,
        pattern: &str,
    ) -> Result<crossbeam_channel::Receiver<KeyEvent>, AgentError> {
        let addr = self.client.get_connection_info().clone();
        let channel_pattern = format!("__keyspace@{}__:{}", db_index(db_name), pattern);
        let (tx, rx) = crossbeam_channel::unbounded();

        thread::spawn(move || {
            let client = match Client::open(addr) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("subscribe_keyspace: could not open connection: {}", e);
                    return;
                }
            };
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    log::error!("subscribe_keyspace: could not connect: {}", e);
                    return;
                }
            };
            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.psubscribe(&channel_pattern) {
                log::error!("subscribe_keyspace: psubscribe({}) failed: {}", channel_pattern, e);
                return;
            }
            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) => {
                        log::warn!("subscribe_keyspace: recv failed, exiting loop: {}", e);
                        return;
                    }
                };
                let chan: String = msg.get_channel_name().to_string();
                let key = match chan.splitn(2, ':').nth(1) {
                    Some(k) => k.to_string(),
                    None => continue,
                };
                let op: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let kind = match op.as_str() {
                    "set" | "hset" | "hmset" | "del" => match op.as_str() {
                        "del" => KeyEventKind::Del,
                        _ => KeyEventKind::Set,
                    },
                    "expired" => KeyEventKind::Expired,
                    _ => continue,
                };
                if tx.send(KeyEvent { kind, key }).is_err() {
                    // Receiver dropped: updater shut down, release the subscription.
                    return;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_index_known_names() {
        assert_eq!(db_index("APPL_DB"), 0);
        assert_eq!(db_index("ASIC_DB"), 1);
        assert_eq!(db_index("COUNTERS_DB"), 2);
        assert_eq!(db_index("CONFIG_DB"), 4);
        assert_eq!(db_index("STATE_DB"), 6);
    }
}
