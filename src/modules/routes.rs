//! `ipCidrRouteTable`: one row per destination prefix in the routing table,
//! indexed by `(dest-octets..., mask-octets...)` per RFC 2096's combined index.

use crate::db::Namespaces;
use crate::error::Result;
use crate::mib::scheduler::Updater;
use crate::mib::{Column, Entry, IndexedCache};
use crate::oid::Oid;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ROUTE_TABLE: [u32; 11] = [1, 3, 6, 1, 2, 1, 4, 24, 4, 1, 0];

fn route_col(col: u32) -> Oid {
    let mut v = ROUTE_TABLE[..10].to_vec();
    v.push(col);
    Oid::new(v)
}

#[derive(Debug, Clone, Default)]
pub struct Row {
    pub dest: [u8; 4],
    pub mask: [u8; 4],
    pub next_hops: Vec<[u8; 4]>,
    pub if_names: Vec<String>,
}

fn parse_prefix(prefix: &str) -> Option<([u8; 4], [u8; 4])> {
    let mut parts = prefix.splitn(2, '/');
    let addr = parse_ipv4(parts.next()?)?;
    let plen: u32 = parts.next()?.parse().ok()?;
    if plen > 32 {
        return None;
    }
    let mask_bits: u32 = if plen == 0 { 0 } else { u32::MAX << (32 - plen) };
    Some((addr, mask_bits.to_be_bytes()))
}

fn parse_ipv4(s: &str) -> Option<[u8; 4]> {
    let mut out = [0u8; 4];
    let mut parts = s.split('.');
    for slot in out.iter_mut() {
        *slot = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

fn sub_id(dest: &[u8; 4], mask: &[u8; 4]) -> Vec<u32> {
    dest.iter().chain(mask.iter()).map(|b| *b as u32).collect()
}

pub struct RoutesUpdater {
    db: Arc<Namespaces>,
    cache: Arc<IndexedCache<Row>>,
}

impl RoutesUpdater {
    pub fn new(db: Arc<Namespaces>, cache: Arc<IndexedCache<Row>>) -> Self {
        RoutesUpdater { db, cache }
    }
}

impl Updater for RoutesUpdater {
    fn name(&self) -> &str {
        "routes"
    }

    fn reinit(&self) -> Result<()> {
        Ok(())
    }

    fn update(&self) -> Result<()> {
        let mut rows: BTreeMap<Vec<u32>, Row> = BTreeMap::new();
        for key in self.db.keys("APPL_DB", "ROUTE_TABLE:*") {
            let prefix = match key.strip_prefix("ROUTE_TABLE:") {
                Some(p) => p,
                None => continue,
            };
            let (dest, mask) = match parse_prefix(prefix) {
                Some(dm) => dm,
                None => continue,
            };
            let fields = self.db.get_all("APPL_DB", &key);
            let nexthop_field = fields.get("nexthop");
            let ifname_field = fields.get("ifname");
            let (nexthop_field, ifname_field) = match (nexthop_field, ifname_field) {
                (Some(n), Some(i)) => (n, i),
                _ => {
                    log::warn!("routes: {} missing nexthop/ifname, skipping", key);
                    continue;
                }
            };
            let next_hops: Vec<[u8; 4]> = nexthop_field.split(',').filter_map(parse_ipv4).collect();
            let if_names: Vec<String> = ifname_field.split(',').map(|s| s.to_string()).collect();
            rows.insert(
                sub_id(&dest, &mask),
                Row {
                    dest,
                    mask,
                    next_hops,
                    if_names,
                },
            );
        }
        self.cache.publish(rows);
        Ok(())
    }
}

pub fn register(cache: Arc<IndexedCache<Row>>) -> Vec<Entry> {
    vec![
        Entry::subtree(
            route_col(1),
            Arc::new(Column::new(cache.clone(), |r: &Row| Ok(Value::IpAddress(r.dest)))),
        ),
        Entry::subtree(
            route_col(7),
            Arc::new(Column::new(cache.clone(), |r: &Row| {
                Ok(Value::IpAddress(r.next_hops.first().copied().unwrap_or([0, 0, 0, 0])))
            })),
        ),
        Entry::subtree(
            route_col(11),
            Arc::new(Column::new(cache, |r: &Row| Ok(Value::IpAddress(r.mask)))),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cidr_prefix() {
        let (dest, mask) = parse_prefix("10.0.0.0/24").unwrap();
        assert_eq!(dest, [10, 0, 0, 0]);
        assert_eq!(mask, [255, 255, 255, 0]);
    }

    #[test]
    fn parses_default_route() {
        let (dest, mask) = parse_prefix("0.0.0.0/0").unwrap();
        assert_eq!(dest, [0, 0, 0, 0]);
        assert_eq!(mask, [0, 0, 0, 0]);
    }

    #[test]
    fn rejects_malformed_prefix() {
        assert!(parse_prefix("not-a-prefix").is_none());
        assert!(parse_prefix("10.0.0.0/99").is_none());
    }
}
