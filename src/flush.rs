//! Component E: the flush worker (§4.E).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use crossbeam::channel::Receiver;

use crate::config::TableBuilderConfig;
use crate::error::{EngineError, FatalHandler};
use crate::io::DirectWriter;
use crate::l0::{FileIdAllocator, L0Set, L0Table};
use crate::l0_index::L0ShardIndex;
use crate::manifest::{Manifest, ManifestRecord};
use crate::mem_table::CFTable;
use crate::memtable_stack::MemTableStack;
use crate::shard::ShardMapHandle;
use crate::shard_table::ShardTableBuilder;

/// Stands in for the transaction oracle collaborator (§6): a monotonically
/// increasing commit version, bumped once per flush.
#[derive(Default)]
pub struct CommitOracle {
    next: AtomicU64,
}

impl CommitOracle {
    pub fn commit_ts(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct FlushWorker {
    rx: Receiver<Arc<CFTable>>,
    dir: PathBuf,
    num_cfs: usize,
    shards: Arc<ShardMapHandle>,
    file_ids: Arc<FileIdAllocator>,
    l0_set: Arc<L0Set>,
    mem_stack: Arc<MemTableStack>,
    manifest: Arc<Manifest>,
    oracle: Arc<CommitOracle>,
    table_builder: TableBuilderConfig,
    on_fatal: FatalHandler,
}

impl FlushWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: Receiver<Arc<CFTable>>,
        dir: PathBuf,
        num_cfs: usize,
        shards: Arc<ShardMapHandle>,
        file_ids: Arc<FileIdAllocator>,
        l0_set: Arc<L0Set>,
        mem_stack: Arc<MemTableStack>,
        manifest: Arc<Manifest>,
        oracle: Arc<CommitOracle>,
        table_builder: TableBuilderConfig,
        on_fatal: FatalHandler,
    ) -> Self {
        Self {
            rx,
            dir,
            num_cfs,
            shards,
            file_ids,
            l0_set,
            mem_stack,
            manifest,
            oracle,
            table_builder,
            on_fatal,
        }
    }

    /// Drains the flush channel in submission order until it disconnects
    /// (§4.E, §5 "Cancellation/shutdown").
    pub fn run(self) {
        while let Ok(table) = self.rx.recv() {
            if let Err(e) = self.flush_one(&table) {
                let err = EngineError::Fatal(format!("{e:#}"));
                (self.on_fatal)(&err);
                return;
            }
        }
        tracing::info!("flush worker shutting down, channel closed");
    }

    fn flush_one(&self, table: &Arc<CFTable>) -> Result<()> {
        let fid = self.file_ids.next();
        tracing::info!(fid, memtable_id = table.id(), "flushing memtable");

        let shards = self.shards.load();
        let mut builders: BTreeMap<Bytes, ShardTableBuilder> = BTreeMap::new();

        // Optimistic last-shard cache (§9): keys are monotonic per CF, so we
        // usually avoid a shard-map lookup per entry.
        for cf in 0..self.num_cfs {
            let mut cached_end: Option<Bytes> = None;
            let mut cached_start: Option<Bytes> = None;
            for (key, value) in table.iter(cf) {
                let still_in_cache = cached_end
                    .as_ref()
                    .map(|end| end.is_empty() || key < *end)
                    .unwrap_or(false);
                let start = if still_in_cache {
                    cached_start.clone().unwrap()
                } else {
                    let shard = shards.get(&key);
                    cached_end = Some(shard.end.clone());
                    cached_start = Some(shard.start.clone());
                    builders
                        .entry(shard.start.clone())
                        .or_insert_with(|| ShardTableBuilder::new(shard.clone(), self.num_cfs));
                    shard.start.clone()
                };
                builders.get_mut(&start).unwrap().add(cf, key, value);
            }
        }

        if builders.is_empty() {
            tracing::warn!(fid, "flushing an empty memtable produced no shards");
        }

        let data_path = crate::l0::data_path(&self.dir, fid);
        let index_path = crate::l0::index_path(&self.dir, fid);
        let mut writer = DirectWriter::create(
            &data_path,
            self.table_builder.write_buffer_size,
            self.table_builder.block_size,
        )
        .context("opening L0 data file")?;

        let mut start_keys = Vec::with_capacity(builders.len());
        let mut end_offsets = Vec::with_capacity(builders.len());
        let mut end_key = Bytes::new();
        let mut cursor: u64 = 0;

        // Builders are already ordered by `start` (BTreeMap).
        for (_, builder) in builders {
            let shard = builder.shard().clone();
            let blob = builder.finish();
            cursor += blob.len() as u64;
            writer.write(&blob).context("writing shard blob")?;
            start_keys.push(shard.start.clone());
            end_offsets.push(cursor as u32);
            end_key = shard.end.clone();
        }
        writer.finish().context("finishing L0 data file")?;
        tracing::info!(fid, shard_count = end_offsets.len(), byte_size = cursor, "flushed memtable");

        let index = L0ShardIndex::new(start_keys, end_key, end_offsets);
        let mut index_writer = DirectWriter::create(
            &index_path,
            self.table_builder.write_buffer_size,
            self.table_builder.block_size,
        )
        .context("opening L0 index file")?;
        index_writer.write(&index.encode()).context("writing L0 index")?;
        index_writer.finish().context("finishing L0 index file")?;

        // Reopen for reading (§4.E step 4).
        let l0_table = L0Table::open(&self.dir, fid).context("reopening flushed L0 table")?;

        self.publish(fid, l0_table, table.id())
    }

    fn publish(&self, fid: u32, l0_table: L0Table, memtable_id: usize) -> Result<()> {
        let head_version = self.oracle.commit_ts();
        self.manifest
            .add_record(&ManifestRecord::CreateL0 { id: fid, head_version })
            .context("appending manifest record")?;

        // L0 is published before the memtable is removed (§4.E ordering
        // guarantee): a concurrent reader merging memtables ∪ L0s never
        // misses data.
        self.l0_set.prepend(Arc::new(l0_table));
        self.mem_stack.drain(memtable_id);
        Ok(())
    }
}
