//! Component B collaborator: the per-CF memtable (§3, §6).
//!
//! A basic memtable, based on `crossbeam-skiplist`, one skip list per column
//! family. Reused from the teacher's `mem_table.rs` idiom, generalized from a
//! single ordered map to `NumCFs` of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::entry::Entry;

/// A writable-or-frozen, multi-CF, ordered in-memory table.
pub struct CFTable {
    id: usize,
    capacity: usize,
    cfs: Vec<Arc<SkipMap<Bytes, Bytes>>>,
    approximate_size: AtomicUsize,
}

impl CFTable {
    pub fn new(id: usize, capacity: usize, num_cfs: usize) -> Self {
        Self {
            id,
            capacity,
            cfs: (0..num_cfs).map(|_| Arc::new(SkipMap::new())).collect(),
            approximate_size: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bulk-inserts already-sorted entries for one column family (§4.C).
    pub fn put_entries(&self, cf: usize, entries: &[Entry]) {
        let map = &self.cfs[cf];
        let mut added = 0;
        for entry in entries {
            if map.get(&entry.key).is_none() {
                added += entry.key.len() + entry.value.len();
            }
            map.insert(entry.key.clone(), entry.value.clone());
        }
        self.approximate_size.fetch_add(added, Ordering::Relaxed);
    }

    pub fn get(&self, cf: usize, key: &[u8]) -> Option<Bytes> {
        self.cfs[cf].get(key).map(|e| e.value().clone())
    }

    pub fn size(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.cfs.iter().all(|m| m.is_empty())
    }

    pub fn num_cfs(&self) -> usize {
        self.cfs.len()
    }

    /// Forward iterator over one CF's entries in key order (§3).
    pub fn iter(&self, cf: usize) -> impl Iterator<Item = (Bytes, Bytes)> + '_ {
        self.cfs[cf].iter().map(|e| (e.key().clone(), e.value().clone()))
    }
}
