//! Component A: the shard-by-key tree (§4.A).
//!
//! Shards partition the full key space into half-open `[start, end)` ranges.
//! An empty `start` stands for "no lower bound" and an empty `end` stands for
//! "no upper bound" — the usual LSM convention (mirrored from the shape of
//! `Shard` in tikv's kvengine) rather than a real, storable zero-length key.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub id: u64,
    pub start: Bytes,
    pub end: Bytes,
}

impl Shard {
    pub fn new(id: u64, start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            id,
            start: start.into(),
            end: end.into(),
        }
    }

    /// `end` empty means unbounded above.
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_ref() && (self.end.is_empty() || key < self.end.as_ref())
    }
}

/// Persistent, ordered map of shard start-keys → shard descriptors.
#[derive(Debug, Clone)]
pub struct ShardMap {
    by_start: BTreeMap<Bytes, Shard>,
}

impl ShardMap {
    pub fn new(shards: Vec<Shard>) -> Self {
        let by_start = shards.into_iter().map(|s| (s.start.clone(), s)).collect();
        Self { by_start }
    }

    /// Returns the shard whose `[start, end)` contains `user_key`. Coverage
    /// is assumed complete (§4.A): a lookup outside the map's coverage is a
    /// logic-error panic, not a recoverable condition.
    pub fn get(&self, user_key: &[u8]) -> &Shard {
        self.by_start
            .range::<[u8], _>((
                std::ops::Bound::Unbounded,
                std::ops::Bound::Included(user_key),
            ))
            .next_back()
            .map(|(_, s)| s)
            .unwrap_or_else(|| panic!("shard map coverage violated for key {user_key:?}"))
    }

    /// Returns a new map where the contiguous span covered by `old` has been
    /// replaced by `new`. Both must be ordered by `start` and span the same
    /// half-open range (§4.A).
    pub fn replace(&self, old: &[Shard], new: Vec<Shard>) -> ShardMap {
        assert!(!old.is_empty(), "replace requires at least one old shard");
        assert!(!new.is_empty(), "replace requires at least one new shard");
        assert!(
            is_contiguous(old),
            "old shards must be contiguous and ordered"
        );
        assert!(
            is_contiguous(&new),
            "new shards must be contiguous and ordered"
        );
        assert_eq!(
            old.first().unwrap().start,
            new.first().unwrap().start,
            "replace must preserve the span's lower bound"
        );
        assert_eq!(
            old.last().unwrap().end,
            new.last().unwrap().end,
            "replace must preserve the span's upper bound"
        );

        let mut by_start = self.by_start.clone();
        for s in old {
            by_start.remove(s.start.as_ref());
        }
        for s in new {
            by_start.insert(s.start.clone(), s);
        }
        ShardMap { by_start }
    }

    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.by_start.values()
    }

    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }

    /// A single shard spanning the whole key space — the initial state of a
    /// freshly created engine.
    pub fn whole_range() -> Self {
        Self::new(vec![Shard::new(1, Bytes::new(), Bytes::new())])
    }
}

fn is_contiguous(shards: &[Shard]) -> bool {
    shards
        .windows(2)
        .all(|w| !w[0].end.is_empty() && w[0].end == w[1].start)
}

/// Atomically-published handle over a [`ShardMap`] snapshot (§5).
pub struct ShardMapHandle {
    inner: RwLock<Arc<ShardMap>>,
}

impl ShardMapHandle {
    pub fn new(map: ShardMap) -> Self {
        Self {
            inner: RwLock::new(Arc::new(map)),
        }
    }

    pub fn load(&self) -> Arc<ShardMap> {
        self.inner.read().clone()
    }

    pub fn publish(&self, map: ShardMap) {
        *self.inner.write() = Arc::new(map);
    }
}
