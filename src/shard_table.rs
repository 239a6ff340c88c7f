//! The multi-CF shard-data builder collaborator consumed by the flush
//! worker (§6: "SST/shard-data builder: new(shard, ncf, options), add(cf,
//! key, value), finish() -> bytes"). The on-disk SSTable block/bloom format
//! underneath a single shard's blob is explicitly out of scope (§1); this is
//! a minimal, self-checksummed encoding in the teacher's idiom (length
//! prefixes via `bytes::BufMut`, integrity via `crc32fast`, matching
//! `manifest.rs` and the teacher's `BlockMeta` codec).

use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes};

use crate::shard::Shard;

/// Builds one shard's blob: `NumCFs` runs of sorted `(key, value)` pairs.
pub struct ShardTableBuilder {
    shard: Shard,
    cfs: Vec<Vec<(Bytes, Bytes)>>,
}

impl ShardTableBuilder {
    pub fn new(shard: Shard, num_cfs: usize) -> Self {
        Self {
            shard,
            cfs: vec![Vec::new(); num_cfs],
        }
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    /// Entries must be added in sorted-key order per CF (the flush worker
    /// iterates memtable CFs in order, §4.E).
    pub fn add(&mut self, cf: usize, key: Bytes, value: Bytes) {
        self.cfs[cf].push((key, value));
    }

    pub fn is_empty(&self) -> bool {
        self.cfs.iter().all(|c| c.is_empty())
    }

    /// Layout: `u32 numCfs`, then per CF `u32 count` followed by `count`
    /// `(u32 keyLen, key, u32 valueLen, value)` tuples, then a trailing
    /// `u32` crc32 checksum of everything before it.
    pub fn finish(self) -> Bytes {
        let mut buf = Vec::new();
        buf.put_u32(self.cfs.len() as u32);
        for cf in &self.cfs {
            buf.put_u32(cf.len() as u32);
            for (key, value) in cf {
                buf.put_u32(key.len() as u32);
                buf.put_slice(key);
                buf.put_u32(value.len() as u32);
                buf.put_slice(value);
            }
        }
        let checksum = crc32fast::hash(&buf);
        buf.put_u32(checksum);
        buf.into()
    }
}

/// Reads back a shard blob produced by [`ShardTableBuilder::finish`]. Used by
/// the flush worker's future readers and by tests validating §8's ordering
/// invariants; not on the hot write path.
pub fn decode_shard_table(mut bytes: &[u8]) -> Result<Vec<Vec<(Bytes, Bytes)>>> {
    if bytes.len() < 4 {
        bail!("shard table truncated: missing checksum");
    }
    let (body, checksum_bytes) = bytes.split_at(bytes.len() - 4);
    let expected = (&checksum_bytes[..]).get_u32();
    if crc32fast::hash(body) != expected {
        bail!("shard table checksum mismatch");
    }

    bytes = body;
    let num_cfs = bytes.get_u32() as usize;
    let mut cfs = Vec::with_capacity(num_cfs);
    for _ in 0..num_cfs {
        let count = bytes.get_u32() as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let klen = bytes.get_u32() as usize;
            let key = bytes.copy_to_bytes(klen);
            let vlen = bytes.get_u32() as usize;
            let value = bytes.copy_to_bytes(vlen);
            entries.push((key, value));
        }
        cfs.push(entries);
    }
    Ok(cfs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiple_cfs() {
        let shard = Shard::new(1, Bytes::new(), Bytes::new());
        let mut builder = ShardTableBuilder::new(shard, 2);
        builder.add(0, Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        builder.add(0, Bytes::from_static(b"b"), Bytes::from_static(b"2"));
        builder.add(1, Bytes::from_static(b"x"), Bytes::from_static(b"y"));
        let bytes = builder.finish();
        let decoded = decode_shard_table(&bytes).unwrap();
        assert_eq!(
            decoded[0],
            vec![
                (Bytes::from_static(b"a"), Bytes::from_static(b"1")),
                (Bytes::from_static(b"b"), Bytes::from_static(b"2")),
            ]
        );
        assert_eq!(decoded[1], vec![(Bytes::from_static(b"x"), Bytes::from_static(b"y"))]);
    }

    #[test]
    fn detects_corruption() {
        let shard = Shard::new(1, Bytes::new(), Bytes::new());
        let mut builder = ShardTableBuilder::new(shard, 1);
        builder.add(0, Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        let mut bytes = builder.finish().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(decode_shard_table(&bytes).is_err());
    }
}
