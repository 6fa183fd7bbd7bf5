//! The MIB dispatch tree: an immutable, ordered map from OID prefix to a typed binding,
//! built once at startup from the composition of every module's declared entries.
//!
//! Every concrete data module (interfaces, LLDP, FDB, routes, BGP peers, physical entities)
//! reduces to the same two shapes described in the data model: a [`ScalarObject`] answering at
//! a single fixed sub_id, and a table [`Column`] reading off a shared [`IndexedCache`] snapshot
//! that the module's updater republishes each cycle. Composition is then just "collect every
//! module's `Vec<Entry>` and sort them" (see [`MibTree::build`]).

pub mod scheduler;

use crate::error::AgentError;
use crate::oid::Oid;
use crate::value::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

/// A single-slot publish/subscribe cell: the updater swaps in a whole new `Arc<T>` after each
/// `update()` completes, so a reader's `load()` always sees a complete, self-consistent
/// snapshot — never a torn mix of an old and a new cycle's fields.
pub struct Snapshot<T> {
    inner: Mutex<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(initial: T) -> Self {
        Snapshot {
            inner: Mutex::new(Arc::new(initial)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        self.inner.lock().expect("snapshot mutex poisoned").clone()
    }

    pub fn publish(&self, value: T) {
        *self.inner.lock().expect("snapshot mutex poisoned") = Arc::new(value);
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Snapshot::new(T::default())
    }
}

/// The ordered index of live rows an updater publishes for one table: sub_id (relative to the
/// table's OID prefix) to row. `BTreeMap` gives us `first`/`next` for free via range queries.
pub struct IndexedCache<T> {
    snapshot: Snapshot<BTreeMap<Vec<u32>, T>>,
}

impl<T> Default for IndexedCache<T> {
    fn default() -> Self {
        IndexedCache {
            snapshot: Snapshot::new(BTreeMap::new()),
        }
    }
}

impl<T: Clone> IndexedCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, rows: BTreeMap<Vec<u32>, T>) {
        self.snapshot.publish(rows);
    }

    pub fn first_sub_id(&self) -> Option<Vec<u32>> {
        self.snapshot.load().keys().next().cloned()
    }

    pub fn next_sub_id(&self, sub_id: &[u32]) -> Option<Vec<u32>> {
        self.snapshot
            .load()
            .range::<Vec<u32>, _>((Bound::Excluded(sub_id.to_vec()), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    pub fn get(&self, sub_id: &[u32]) -> Option<T> {
        self.snapshot.load().get(sub_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a MIB tree node is bound to: a live index of sub_ids plus a getter. Scalar and subtree
/// entries are both instances of this trait — a scalar is simply a table with exactly one row
/// at sub_id `[0]`.
pub trait MibObject: Send + Sync {
    fn first_sub_id(&self) -> Option<Vec<u32>>;
    fn next_sub_id(&self, sub_id: &[u32]) -> Option<Vec<u32>>;
    /// `None` means the sub_id is not a live instance (`no_such_instance` / walk-past-end);
    /// `Some(Err(_))` means the getter itself failed (`genErr`).
    fn get(&self, sub_id: &[u32]) -> Option<Result<Value, AgentError>>;
}

/// A scalar entry: one getter, answering only at sub_id `[0]` (RFC 2741's usual convention for
/// a scalar's sole instance).
pub struct ScalarObject<F> {
    getter: F,
}

impl<F> ScalarObject<F>
where
    F: Fn() -> Result<Value, AgentError> + Send + Sync,
{
    pub fn new(getter: F) -> Self {
        ScalarObject { getter }
    }
}

impl<F> MibObject for ScalarObject<F>
where
    F: Fn() -> Result<Value, AgentError> + Send + Sync,
{
    fn first_sub_id(&self) -> Option<Vec<u32>> {
        Some(vec![0])
    }

    fn next_sub_id(&self, _sub_id: &[u32]) -> Option<Vec<u32>> {
        None
    }

    fn get(&self, sub_id: &[u32]) -> Option<Result<Value, AgentError>> {
        if sub_id == [0] {
            Some((self.getter)())
        } else {
            None
        }
    }
}

/// A table column: shares one [`IndexedCache`] (the table's row index) with every other column
/// of the same table, each with its own projection from row to [`Value`].
pub struct Column<T, F> {
    cache: Arc<IndexedCache<T>>,
    project: F,
}

impl<T, F> Column<T, F>
where
    T: Clone,
    F: Fn(&T) -> Result<Value, AgentError> + Send + Sync,
{
    pub fn new(cache: Arc<IndexedCache<T>>, project: F) -> Self {
        Column { cache, project }
    }
}

impl<T, F> MibObject for Column<T, F>
where
    T: Clone + Send + Sync,
    F: Fn(&T) -> Result<Value, AgentError> + Send + Sync,
{
    fn first_sub_id(&self) -> Option<Vec<u32>> {
        self.cache.first_sub_id()
    }

    fn next_sub_id(&self, sub_id: &[u32]) -> Option<Vec<u32>> {
        self.cache.next_sub_id(sub_id)
    }

    fn get(&self, sub_id: &[u32]) -> Option<Result<Value, AgentError>> {
        self.cache.get(sub_id).map(|row| (self.project)(&row))
    }
}

/// Whether an [`Entry`] is the MIB's own documentation of a scalar or a table column. Carried
/// purely for startup-time review and diagnostics; dispatch itself goes through [`MibObject`]
/// uniformly for both kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Scalar,
    Subtree,
}

/// One binding in the composite OID namespace: `oid` is the entry's prefix (everything up to,
/// but not including, the sub_id), `object` resolves sub_ids under that prefix to values.
pub struct Entry {
    pub oid: Oid,
    pub kind: EntryKind,
    pub object: Arc<dyn MibObject>,
}

impl Entry {
    pub fn scalar(oid: Oid, object: Arc<dyn MibObject>) -> Self {
        Entry {
            oid,
            kind: EntryKind::Scalar,
            object,
        }
    }

    pub fn subtree(oid: Oid, object: Arc<dyn MibObject>) -> Self {
        Entry {
            oid,
            kind: EntryKind::Subtree,
            object,
        }
    }
}

/// The result of a `Get`-style exact lookup.
pub enum Lookup {
    NoSuchObject,
    NoSuchInstance,
    Value(Value),
    GetterError(AgentError),
}

/// The result of a `GetNext`/`GetBulk`-style walk.
pub enum Successor {
    EndOfMibView,
    Found(Oid, Value),
    GetterError(Oid, AgentError),
}

/// The immutable, composite OID namespace. Built once at startup; `lookup`/`successor` never
/// mutate it, so sharing one `Arc<MibTree>` between the session and the scheduler needs no lock.
pub struct MibTree {
    entries: Vec<Entry>,
}

impl MibTree {
    /// Composes every module's entries into one sorted, collision-free tree. Colliding OIDs
    /// between two declared entries is a programming error: startup fails rather
    /// than silently shadowing one module's column with another's.
    pub fn build(mut entries: Vec<Entry>) -> Result<Self, String> {
        entries.sort_by(|a, b| a.oid.cmp(&b.oid));
        for pair in entries.windows(2) {
            if pair[0].oid == pair[1].oid {
                return Err(format!(
                    "MIB composition collision: two entries declared at {}",
                    pair[0].oid
                ));
            }
        }
        Ok(MibTree { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the first entry whose `oid` is strictly greater than `o`; equivalently, the
    /// count of entries with `oid <= o`.
    fn partition_past(&self, o: &Oid) -> usize {
        self.entries.partition_point(|e| e.oid <= *o)
    }

    /// Longest-prefix lookup: the entry `E` with the greatest `E.oid <= o` that is also a
    /// prefix of `o`, if any. Sorting guarantees that when several declared entries are
    /// prefixes of one another, the longest one sorts last among those `<= o`.
    fn entry_for(&self, o: &Oid) -> Option<(usize, &Entry)> {
        let idx = self.partition_past(o);
        if idx == 0 {
            return None;
        }
        let cand = &self.entries[idx - 1];
        if cand.oid.is_prefix_of(o) {
            Some((idx - 1, cand))
        } else {
            None
        }
    }

    pub fn lookup(&self, o: &Oid) -> Lookup {
        match self.entry_for(o) {
            None => Lookup::NoSuchObject,
            Some((_, entry)) => {
                let sub_id = &o.as_slice()[entry.oid.len()..];
                match entry.object.get(sub_id) {
                    None => Lookup::NoSuchInstance,
                    Some(Ok(v)) => Lookup::Value(v),
                    Some(Err(e)) => Lookup::GetterError(e),
                }
            }
        }
    }

    /// `GetNext`/`GetBulk` walk. `include_self`: an exact match on a live leaf counts as its
    /// own successor (used by `GetNext` when the search-range operand's include flag is set).
    pub fn successor(&self, o: &Oid, include_self: bool) -> Successor {
        let idx = self.partition_past(o);
        if idx > 0 {
            let cand_idx = idx - 1;
            let cand = &self.entries[cand_idx];
            if cand.oid.is_prefix_of(o) {
                let sub_id: Vec<u32> = o.as_slice()[cand.oid.len()..].to_vec();
                if include_self {
                    if let Some(outcome) = cand.object.get(&sub_id) {
                        return match outcome {
                            Ok(v) => Successor::Found(o.clone(), v),
                            Err(e) => Successor::GetterError(o.clone(), e),
                        };
                    }
                }
                let next_sub = if sub_id.is_empty() {
                    cand.object.first_sub_id()
                } else {
                    cand.object.next_sub_id(&sub_id)
                };
                if let Some(ns) = next_sub {
                    let new_oid = cand.oid.child(&ns);
                    return match cand.object.get(&ns) {
                        Some(Ok(v)) => Successor::Found(new_oid, v),
                        Some(Err(e)) => Successor::GetterError(new_oid, e),
                        // The index claimed `ns` was live but the getter disagrees: treat the
                        // row as gone rather than wedging the walk (evictions race updates).
                        None => self.successor_from(cand_idx + 1),
                    };
                }
                // Live index is empty (or we ran off it): per the open-question resolution in
                // DESIGN.md, a walk falls through to the next declared entry rather than
                // reporting `no_such_instance`.
                return self.successor_from(cand_idx + 1);
            }
        }
        self.successor_from(idx)
    }

    fn successor_from(&self, start: usize) -> Successor {
        for entry in &self.entries[start..] {
            if let Some(first) = entry.object.first_sub_id() {
                let oid = entry.oid.child(&first);
                match entry.object.get(&first) {
                    Some(Ok(v)) => return Successor::Found(oid, v),
                    Some(Err(e)) => return Successor::GetterError(oid, e),
                    None => continue,
                }
            }
        }
        Successor::EndOfMibView
    }
}
