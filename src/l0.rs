//! The L0 table / L0 set (§3 "L0 table", "L0 set"; §5 publication).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::l0_index::L0ShardIndex;

pub fn data_path(dir: &Path, fid: u32) -> PathBuf {
    dir.join(format!("{fid:010}.sst"))
}

pub fn index_path(dir: &Path, fid: u32) -> PathBuf {
    dir.join(format!("{fid:010}.idx"))
}

/// One on-disk L0 table: a data file partitioned by shard plus its sidecar
/// index (§3, §4.F).
pub struct L0Table {
    pub fid: u32,
    pub index: L0ShardIndex,
    dir: PathBuf,
}

impl L0Table {
    /// Opens an L0 table for reading: reads the sidecar index (§4.E step 4).
    pub fn open(dir: impl Into<PathBuf>, fid: u32) -> Result<Self> {
        let dir = dir.into();
        let raw = std::fs::read(index_path(&dir, fid))
            .with_context(|| format!("reading index for L0 table {fid}"))?;
        let index = L0ShardIndex::decode(&raw)
            .with_context(|| format!("decoding index for L0 table {fid}"))?;
        Ok(Self { fid, index, dir })
    }

    pub fn data_path(&self) -> PathBuf {
        data_path(&self.dir, self.fid)
    }

    /// Reads the byte range belonging to shard `i`, per the cumulative
    /// `endOffset` table (§4.F).
    pub fn read_shard_bytes(&self, i: usize) -> Result<Vec<u8>> {
        let start = if i == 0 { 0 } else { self.index.end_offsets[i - 1] as u64 };
        let end = self.index.end_offsets[i] as u64;
        use std::io::{Read, Seek, SeekFrom};
        let mut file = std::fs::File::open(self.data_path())?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Allocates monotonically increasing 32-bit file-ids (§3).
pub struct FileIdAllocator {
    next: AtomicU32,
}

impl FileIdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU32::new(1) }
    }

    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for FileIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered sequence of L0 tables, newest first, published atomically (§5).
pub struct L0Set {
    inner: RwLock<Arc<Vec<Arc<L0Table>>>>,
}

impl L0Set {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn load(&self) -> Arc<Vec<Arc<L0Table>>> {
        self.inner.read().clone()
    }

    /// Prepends the newly-flushed table (§4.E "Publish step": L0 is
    /// published before the memtable is removed).
    pub fn prepend(&self, table: Arc<L0Table>) {
        let mut guard = self.inner.write();
        let mut new_list = Vec::with_capacity(guard.len() + 1);
        new_list.push(table);
        new_list.extend(guard.iter().cloned());
        *guard = Arc::new(new_list);
    }
}

impl Default for L0Set {
    fn default() -> Self {
        Self::new()
    }
}
