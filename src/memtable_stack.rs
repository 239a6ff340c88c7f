//! Component B (stack) + Component D (Switch protocol), §4.B, §4.D.
//!
//! The stack is published as one immutable snapshot behind a lock, mirroring
//! the teacher's own `Arc<RwLock<Arc<LsmStroageState>>>` idiom (§5): readers
//! clone the `Arc` under a read lock and never block a mutator, and the two
//! mutators (Switch, Drain) take the write lock only for the instant it takes
//! to install a new `Arc`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::mem_table::CFTable;

pub type MemTableList = Arc<Vec<Arc<CFTable>>>;

pub struct MemTableStack {
    inner: RwLock<MemTableList>,
    next_id: AtomicUsize,
    num_cfs: usize,
    max_memtable_size: usize,
}

impl MemTableStack {
    pub fn new(num_cfs: usize, max_memtable_size: usize) -> Self {
        let head = Arc::new(CFTable::new(0, max_memtable_size, num_cfs));
        Self {
            inner: RwLock::new(Arc::new(vec![head])),
            next_id: AtomicUsize::new(1),
            num_cfs,
            max_memtable_size,
        }
    }

    /// Readers (queries, flush worker) load the snapshot pointer once.
    pub fn load(&self) -> MemTableList {
        self.inner.read().clone()
    }

    pub fn head(&self) -> Arc<CFTable> {
        self.load()[0].clone()
    }

    /// Switch: allocate a new head of capacity `max(MaxMemTableSize,
    /// min_size)`, publish `[new_head, old_head, ...frozen]`, and return the
    /// displaced head so the caller can enqueue it for flush (§4.D). Returns
    /// `None` when the displaced head was empty — a flush would be a no-op.
    pub fn switch(&self, min_size: usize) -> Option<Arc<CFTable>> {
        let capacity = self.max_memtable_size.max(min_size);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let new_head = Arc::new(CFTable::new(id, capacity, self.num_cfs));

        let mut guard = self.inner.write();
        let old_head = guard[0].clone();
        let mut new_list = Vec::with_capacity(guard.len() + 1);
        new_list.push(new_head);
        new_list.extend(guard.iter().cloned());
        *guard = Arc::new(new_list);
        drop(guard);

        if old_head.is_empty() {
            None
        } else {
            Some(old_head)
        }
    }

    /// Drain: remove exactly one frozen memtable (by id) from the stack,
    /// after its L0 replacement has been published (§4.E "Publish step").
    pub fn drain(&self, id: usize) {
        let mut guard = self.inner.write();
        let new_list: Vec<_> = guard.iter().filter(|t| t.id() != id).cloned().collect();
        *guard = Arc::new(new_list);
    }

    pub fn frozen_count(&self) -> usize {
        self.load().len() - 1
    }

    pub fn num_cfs(&self) -> usize {
        self.num_cfs
    }

    pub fn max_memtable_size(&self) -> usize {
        self.max_memtable_size
    }
}
