use bytes::BufMut;
#[cfg(test)]
use bytes::Buf;
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::Arc,
};
#[cfg(test)]
use std::io::Read;

use anyhow::{Context, Result};
#[cfg(test)]
use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Manifest stores the metadata of on-disk tables (§6, §10.6). Recovery /
/// compaction of the log is out of scope (§1); this is an append-only sink.
pub struct Manifest {
    file: Arc<Mutex<File>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ManifestRecord {
    /// `{ op = CREATE, level = 0, id, head_version }` (§4.E, §6).
    CreateL0 { id: u32, head_version: u64 },
}

impl Manifest {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("fail to create manifest at {}", path.as_ref().display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Appends a length-prefixed, crc32-checksummed record and syncs it to
    /// disk. Fatal on any I/O failure (§7).
    pub fn add_record(&self, record: &ManifestRecord) -> Result<()> {
        let mut file = self.file.lock();
        let mut buf = serde_json::to_vec(record)?;
        let hash = crc32fast::hash(&buf);
        file.write_all(&(buf.len() as u64).to_be_bytes())?;
        buf.put_u32(hash);
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads back every record, for tests only (production recovery is out
    /// of scope, §1).
    #[cfg(test)]
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<ManifestRecord>> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let mut buf = &bytes[..];
        let mut records = Vec::new();
        while buf.has_remaining() {
            if buf.remaining() < 8 {
                bail!("manifest truncated: missing record length");
            }
            let len = buf.get_u64() as usize;
            if buf.remaining() < len + 4 {
                bail!("manifest truncated: missing record body");
            }
            let body = &buf[..len];
            let hash = crc32fast::hash(body);
            let record: ManifestRecord = serde_json::from_slice(body)?;
            buf.advance(len);
            let stored_hash = buf.get_u32();
            if stored_hash != hash {
                bail!("manifest record checksum mismatch");
            }
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST");
        let manifest = Manifest::create(&path).unwrap();
        manifest
            .add_record(&ManifestRecord::CreateL0 {
                id: 1,
                head_version: 7,
            })
            .unwrap();
        manifest
            .add_record(&ManifestRecord::CreateL0 {
                id: 2,
                head_version: 8,
            })
            .unwrap();
        let records = Manifest::read_all(&path).unwrap();
        assert_eq!(
            records,
            vec![
                ManifestRecord::CreateL0 { id: 1, head_version: 7 },
                ManifestRecord::CreateL0 { id: 2, head_version: 8 },
            ]
        );
    }
}
