use bytes::Bytes;
use crossbeam::channel::Sender;

use crate::error::EngineError;
use crate::shard::Shard;

/// A single column-family key/value write, §3.
#[derive(Debug, Clone)]
pub struct Entry {
    pub cf: usize,
    pub key: Bytes,
    pub value: Bytes,
}

impl Entry {
    pub fn new(cf: usize, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            cf,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Rough in-memory footprint, used to decide when to Switch (§4.C).
    pub fn size_estimate(&self) -> usize {
        self.key.len() + self.value.len() + std::mem::size_of::<Self>()
    }
}

/// An ordered batch of entries submitted by one client plus its one-shot
/// notification channel (§3). After submission the write-loop owns it; after
/// notification the client owns the result again.
pub struct WriteBatch {
    pub entries: Vec<Entry>,
    pub notify: Sender<Result<(), EngineError>>,
}

impl WriteBatch {
    pub fn notify_ok(&self) {
        // A disconnected receiver means the client stopped waiting; that's
        // not this batch's problem to report.
        let _ = self.notify.send(Ok(()));
    }

    pub fn notify_err(&self, err: EngineError) {
        let _ = self.notify.send(Err(err));
    }
}

/// One shard's subdivision request within a split task (§4.G).
pub struct SplitRequest {
    pub shard: Shard,
    pub split_keys: Vec<Bytes>,
}

/// A split task travelling through the ingest channel alongside writes so
/// that it serializes against them (§4.C, §9).
pub struct SplitTask {
    pub requests: Vec<SplitRequest>,
    pub notify: Sender<Result<(), EngineError>>,
}

impl SplitTask {
    pub fn notify_ok(&self) {
        let _ = self.notify.send(Ok(()));
    }

    pub fn notify_err(&self, err: EngineError) {
        let _ = self.notify.send(Err(err));
    }
}

/// The tagged union multiplexed on the single ingest channel (§4.C, §9).
pub enum IngestMessage {
    Write(WriteBatch),
    Split(SplitTask),
}
