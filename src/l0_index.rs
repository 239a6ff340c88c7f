//! Component F: the L0 shard index codec (§4.F).
//!
//! Binary layout of the sidecar file, little-endian throughout:
//!
//! ```text
//! u32   numShards = N
//! u32   endOffset[0..N]
//! for i in 0..N:
//!     u16   len(startKey[i])
//!     bytes startKey[i]
//! u16   len(endKey)
//! bytes endKey
//! ```

use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L0ShardIndex {
    pub start_keys: Vec<Bytes>,
    pub end_key: Bytes,
    pub end_offsets: Vec<u32>,
}

impl L0ShardIndex {
    pub fn new(start_keys: Vec<Bytes>, end_key: Bytes, end_offsets: Vec<u32>) -> Self {
        assert_eq!(start_keys.len(), end_offsets.len());
        Self {
            start_keys,
            end_key,
            end_offsets,
        }
    }

    pub fn num_shards(&self) -> usize {
        self.start_keys.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u32_le(self.num_shards() as u32);
        for off in &self.end_offsets {
            buf.put_u32_le(*off);
        }
        for key in &self.start_keys {
            buf.put_u16_le(key.len() as u16);
            buf.put_slice(key);
        }
        buf.put_u16_le(self.end_key.len() as u16);
        buf.put_slice(&self.end_key);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 4 {
            bail!("l0 shard index truncated: missing numShards");
        }
        let n = buf.get_u32_le() as usize;

        if buf.remaining() < n * 4 {
            bail!("l0 shard index truncated: missing endOffset[{}]", n);
        }
        let mut end_offsets = Vec::with_capacity(n);
        for _ in 0..n {
            end_offsets.push(buf.get_u32_le());
        }

        let mut start_keys = Vec::with_capacity(n);
        for i in 0..n {
            if buf.remaining() < 2 {
                bail!("l0 shard index truncated: missing startKey[{i}] length");
            }
            let len = buf.get_u16_le() as usize;
            if buf.remaining() < len {
                bail!("l0 shard index truncated: missing startKey[{i}] bytes");
            }
            start_keys.push(buf.copy_to_bytes(len));
        }

        if buf.remaining() < 2 {
            bail!("l0 shard index truncated: missing endKey length");
        }
        let end_key_len = buf.get_u16_le() as usize;
        if buf.remaining() < end_key_len {
            bail!("l0 shard index truncated: missing endKey bytes");
        }
        let end_key = buf.copy_to_bytes(end_key_len);

        Ok(Self {
            start_keys,
            end_key,
            end_offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let idx = L0ShardIndex::new(
            vec![Bytes::new(), Bytes::from_static(b"m"), Bytes::from_static(b"x")],
            Bytes::from_static(b"z"),
            vec![10, 20, 35],
        );
        let encoded = idx.encode();
        let decoded = L0ShardIndex::decode(&encoded).unwrap();
        assert_eq!(idx, decoded);
    }

    #[test]
    fn decode_rejects_truncated_buffers() {
        let idx = L0ShardIndex::new(vec![Bytes::new()], Bytes::from_static(b"z"), vec![10]);
        let encoded = idx.encode();
        assert!(L0ShardIndex::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(L0ShardIndex::decode(&[]).is_err());
    }

    #[test]
    fn single_shard_empty_bounds() {
        let idx = L0ShardIndex::new(vec![Bytes::new()], Bytes::new(), vec![2000]);
        let decoded = L0ShardIndex::decode(&idx.encode()).unwrap();
        assert_eq!(decoded.num_shards(), 1);
        assert!(decoded.start_keys[0].is_empty());
        assert!(decoded.end_key.is_empty());
        assert_eq!(decoded.end_offsets[0], 2000);
    }
}
