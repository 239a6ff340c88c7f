//! Ties together the write-path core (§2 data flow): ingest channel,
//! write-loop, switch, flush worker, shard map and L0 set, behind one public
//! `Engine` handle. Mirrors the teacher's own `MiniLsm` wrapper around
//! `LsmStorageInner` — a thin owner of the shared, atomically-published
//! state and the background threads that mutate it.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use bytes::Bytes;
use crossbeam::channel::{bounded, Sender};

use crate::config::EngineConfig;
use crate::entry::{Entry, IngestMessage, SplitRequest, SplitTask, WriteBatch};
use crate::error::{process_exit_fatal_handler, EngineError, FatalHandler};
use crate::flush::{CommitOracle, FlushWorker};
use crate::l0::{FileIdAllocator, L0Set, L0Table};
use crate::manifest::Manifest;
use crate::memtable_stack::{MemTableList, MemTableStack};
use crate::shard::{ShardMap, ShardMapHandle};
use crate::write_loop::WriteLoop;

const INGEST_CHANNEL_CAPACITY: usize = 1024;

pub struct Engine {
    #[allow(dead_code)]
    config: EngineConfig,
    shards: Arc<ShardMapHandle>,
    mem_stack: Arc<MemTableStack>,
    l0_set: Arc<L0Set>,
    ingest_tx: Sender<IngestMessage>,
    write_loop_handle: Option<JoinHandle<()>>,
    flush_handle: Option<JoinHandle<()>>,
}

impl Engine {
    /// Opens (creating, if absent) the data directory and starts the
    /// write-loop and flush worker threads (§5).
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::open_with_fatal_handler(config, process_exit_fatal_handler())
    }

    /// Same as [`open`](Self::open), but lets the caller override what
    /// happens on a fatal error instead of terminating the process —
    /// exercised by tests that deliberately trigger I/O failures (§7,
    /// §10.2).
    pub fn open_with_fatal_handler(config: EngineConfig, on_fatal: FatalHandler) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)
            .with_context(|| format!("creating data directory {}", config.dir.display()))?;

        let shards = Arc::new(ShardMapHandle::new(ShardMap::whole_range()));
        let mem_stack = Arc::new(MemTableStack::new(config.num_cfs, config.max_memtable_size));
        let l0_set = Arc::new(L0Set::new());
        let file_ids = Arc::new(FileIdAllocator::new());
        let oracle = Arc::new(CommitOracle::default());
        let manifest = Arc::new(Manifest::create(config.dir.join("MANIFEST"))?);

        let (ingest_tx, ingest_rx) = bounded(INGEST_CHANNEL_CAPACITY);
        let (flush_tx, flush_rx) = bounded(config.num_memtables.max(1));

        let write_loop = WriteLoop::new(
            ingest_rx,
            mem_stack.clone(),
            flush_tx,
            shards.clone(),
            on_fatal.clone(),
        );
        let write_loop_handle = std::thread::Builder::new()
            .name("shardkv-write-loop".into())
            .spawn(move || write_loop.run())
            .context("spawning write-loop thread")?;

        let flush_worker = FlushWorker::new(
            flush_rx,
            config.dir.clone(),
            config.num_cfs,
            shards.clone(),
            file_ids,
            l0_set.clone(),
            mem_stack.clone(),
            manifest,
            oracle,
            config.table_builder.clone(),
            on_fatal,
        );
        let flush_handle = std::thread::Builder::new()
            .name("shardkv-flush-worker".into())
            .spawn(move || flush_worker.run())
            .context("spawning flush-worker thread")?;

        Ok(Self {
            config,
            shards,
            mem_stack,
            l0_set,
            ingest_tx,
            write_loop_handle: Some(write_loop_handle),
            flush_handle: Some(flush_handle),
        })
    }

    /// Submits a write batch and blocks for its notification (§3, §4.C).
    pub fn write(&self, entries: Vec<Entry>) -> std::result::Result<(), EngineError> {
        let (notify, ack) = bounded(1);
        let batch = WriteBatch { entries, notify };
        self.ingest_tx
            .send(IngestMessage::Write(batch))
            .map_err(|_| EngineError::Fatal("ingest channel closed".into()))?;
        ack.recv()
            .map_err(|_| EngineError::Fatal("write-loop closed without notifying".into()))?
    }

    /// Submits a split task covering one or more shards and blocks for its
    /// notification (§4.G).
    pub fn split(&self, requests: Vec<SplitRequest>) -> std::result::Result<(), EngineError> {
        let (notify, ack) = bounded(1);
        let task = SplitTask { requests, notify };
        self.ingest_tx
            .send(IngestMessage::Split(task))
            .map_err(|_| EngineError::Fatal("ingest channel closed".into()))?;
        ack.recv()
            .map_err(|_| EngineError::Fatal("write-loop closed without notifying".into()))?
    }

    pub fn shard_map(&self) -> Arc<ShardMap> {
        self.shards.load()
    }

    pub fn mem_tables(&self) -> MemTableList {
        self.mem_stack.load()
    }

    pub fn l0_tables(&self) -> Arc<Vec<Arc<L0Table>>> {
        self.l0_set.load()
    }

    /// Merge-scans one CF across the memtable stack (newest first) and the
    /// L0 set, for tests validating §8's invariant 1. Not a query planner —
    /// a deterministic full scan used to assert on-disk/in-memory content.
    pub fn scan_all(&self, cf: usize) -> Result<Vec<(Bytes, Bytes)>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        for table in self.mem_stack.load().iter() {
            for (key, value) in table.iter(cf) {
                if seen.insert(key.clone()) {
                    out.push((key, value));
                }
            }
        }

        for l0 in self.l0_set.load().iter() {
            for i in 0..l0.index.num_shards() {
                let bytes = l0.read_shard_bytes(i)?;
                let cfs = crate::shard_table::decode_shard_table(&bytes)?;
                if cf < cfs.len() {
                    for (key, value) in &cfs[cf] {
                        if seen.insert(key.clone()) {
                            out.push((key.clone(), value.clone()));
                        }
                    }
                }
            }
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config.dir.clone()
    }

    /// Signals the closer (§5 "Cancellation/shutdown"): closes the ingest
    /// channel so the write-loop finishes its current iteration and exits,
    /// which in turn drops the flush sender so the flush worker drains and
    /// exits too.
    pub fn close(mut self) {
        // Dropping `ingest_tx` disconnects the channel; `self` is otherwise
        // consumed so no further sends are possible.
        let write_loop_handle = self.write_loop_handle.take();
        let flush_handle = self.flush_handle.take();
        drop(self);
        if let Some(h) = write_loop_handle {
            let _ = h.join();
        }
        if let Some(h) = flush_handle {
            let _ = h.join();
        }
    }
}
