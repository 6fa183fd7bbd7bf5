//! Declarative MIB modules: each one owns a table prefix, an [`Updater`](crate::mib::scheduler::Updater)
//! that republishes an [`IndexedCache`](crate::mib::IndexedCache) snapshot, and a `register()`
//! function returning the [`Entry`](crate::mib::Entry) list the agent composes into the tree.

pub mod bgp;
pub mod fdb;
pub mod interfaces;
pub mod lldp;
pub mod physical;
pub mod routes;

use crate::agent::ModuleBuilder;
use crate::mib::scheduler::Updater;
use crate::mib::IndexedCache;
use std::sync::Arc;

/// The six data modules this agent ships, each a self-contained `(updaters, entries)` builder.
/// `bgpd_addr` is the one module input that isn't a DB handle — the routing daemon's local CLI
/// console address.
pub fn standard_modules(bgpd_addr: String) -> Vec<ModuleBuilder> {
    vec![
        Box::new(|db| {
            let cache = Arc::new(IndexedCache::new());
            let updater: Arc<dyn Updater> = Arc::new(interfaces::InterfacesUpdater::new(db, cache.clone()));
            (vec![updater], interfaces::register(cache))
        }),
        Box::new(|db| {
            let loc_cache = Arc::new(IndexedCache::new());
            let rem_cache = Arc::new(IndexedCache::new());
            let updater: Arc<dyn Updater> = Arc::new(lldp::LldpUpdater::new(db, loc_cache.clone(), rem_cache.clone()));
            (vec![updater], lldp::register(loc_cache, rem_cache))
        }),
        Box::new(|db| {
            let cache = Arc::new(IndexedCache::new());
            let updater: Arc<dyn Updater> = Arc::new(fdb::FdbUpdater::new(db, cache.clone()));
            (vec![updater], fdb::register(cache))
        }),
        Box::new(|db| {
            let cache = Arc::new(IndexedCache::new());
            let updater: Arc<dyn Updater> = Arc::new(routes::RoutesUpdater::new(db, cache.clone()));
            (vec![updater], routes::register(cache))
        }),
        Box::new(move |_db| {
            let cache = Arc::new(IndexedCache::new());
            let updater: Arc<dyn Updater> = Arc::new(bgp::BgpUpdater::new(bgpd_addr, cache.clone()));
            (vec![updater], bgp::register(cache))
        }),
        Box::new(|db| {
            let entity_cache = Arc::new(IndexedCache::new());
            let sensor_cache = Arc::new(IndexedCache::new());
            let updater: Arc<dyn Updater> =
                Arc::new(physical::PhysicalUpdater::new(db, entity_cache.clone(), sensor_cache.clone()));
            (vec![updater], physical::register(entity_cache, sensor_cache))
        }),
    ]
}

/// Interface type tags from IF-MIB's `IANAifType` as used by this family of MIB data.
pub mod if_type {
    pub const ETHERNET_CSMACD: i32 = 6;
    pub const SOFTWARE_LOOPBACK: i32 = 24;
    pub const L3_IPVLAN: i32 = 136;
    pub const IEEE8023AD_LAG: i32 = 161;
}

/// `oid_index` ranges and arithmetic shared by every module that keys rows by interface.
pub mod if_index {
    pub const LAG_BASE: u32 = 1000;
    pub const VLAN_BASE: u32 = 2000;
    pub const MGMT_BASE: u32 = 10000;

    /// Physical front-panel ports are numbered directly from their trailing SONiC port number
    /// (`EthernetN` → `N + 1`), matching the 1-based convention the rest of the tree expects.
    pub fn physical_port(port_number: u32) -> u32 {
        port_number + 1
    }

    pub fn lag(channel_id: u32) -> u32 {
        LAG_BASE + channel_id
    }

    pub fn vlan(vlan_id: u32) -> u32 {
        VLAN_BASE + vlan_id
    }

    pub fn management(index: u32) -> u32 {
        MGMT_BASE + index
    }

    /// Parses the trailing decimal digits off a SONiC interface name (`"Ethernet4"` → `4`,
    /// `"PortChannel12"` → `12`). Names without a trailing number have no stable index.
    pub fn trailing_number(name: &str) -> Option<u32> {
        let digits_at = name.find(|c: char| c.is_ascii_digit())?;
        name[digits_at..].parse().ok()
    }
}
