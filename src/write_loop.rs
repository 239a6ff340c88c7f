//! Component C: the write-loop (§4.C).

use anyhow::Result;
use crossbeam::channel::{Receiver, Sender};

use crate::entry::{Entry, IngestMessage, SplitTask, WriteBatch};
use crate::error::{EngineError, FatalHandler};
use crate::mem_table::CFTable;
use crate::memtable_stack::MemTableStack;
use crate::shard::ShardMapHandle;
use crate::split::execute_split;
use std::sync::Arc;

pub struct WriteLoop {
    rx: Receiver<IngestMessage>,
    mem_stack: Arc<MemTableStack>,
    flush_tx: Sender<Arc<CFTable>>,
    shards: Arc<ShardMapHandle>,
    on_fatal: FatalHandler,
}

impl WriteLoop {
    pub fn new(
        rx: Receiver<IngestMessage>,
        mem_stack: Arc<MemTableStack>,
        flush_tx: Sender<Arc<CFTable>>,
        shards: Arc<ShardMapHandle>,
        on_fatal: FatalHandler,
    ) -> Self {
        Self {
            rx,
            mem_stack,
            flush_tx,
            shards,
            on_fatal,
        }
    }

    /// Runs until the ingest channel disconnects, i.e. every sender (and the
    /// closer) has gone away (§4.C step 5, §5 "Cancellation/shutdown").
    pub fn run(self) {
        loop {
            let first = match self.rx.recv() {
                Ok(msg) => msg,
                Err(_) => {
                    tracing::info!("write-loop shutting down, ingest channel closed");
                    return;
                }
            };

            let mut writes = Vec::new();
            let mut split: Option<SplitTask> = None;
            self.classify(first, &mut writes, &mut split);
            while let Ok(msg) = self.rx.try_recv() {
                self.classify(msg, &mut writes, &mut split);
            }

            if !writes.is_empty() {
                let num_cfs = self.mem_stack.num_cfs();
                let (valid, invalid): (Vec<WriteBatch>, Vec<WriteBatch>) = writes
                    .into_iter()
                    .partition(|batch| batch.entries.iter().all(|e| e.cf < num_cfs));

                // Client validation (§7): a batch naming an out-of-range CF is
                // rejected per-batch over its own notify channel; the
                // write-loop continues processing the rest of the group.
                for batch in &invalid {
                    let bad_cf = batch
                        .entries
                        .iter()
                        .find(|e| e.cf >= num_cfs)
                        .map(|e| e.cf)
                        .unwrap_or(0);
                    batch.notify_err(EngineError::Validation(format!(
                        "entry cf {bad_cf} out of range, engine has {num_cfs} column families"
                    )));
                }

                if !valid.is_empty() {
                    if let Err(e) = self.execute_writes(&valid) {
                        let err = EngineError::Fatal(format!("{e:#}"));
                        for batch in &valid {
                            batch.notify_err(err.clone());
                        }
                        (self.on_fatal)(&err);
                        return;
                    }
                    for batch in &valid {
                        batch.notify_ok();
                    }
                }
            }

            if let Some(split) = split {
                let shard_ids: Vec<u64> = split.requests.iter().map(|r| r.shard.id).collect();
                let split_key_count: usize = split.requests.iter().map(|r| r.split_keys.len()).sum();
                tracing::info!(?shard_ids, split_key_count, "executing split");
                match execute_split(&self.shards, &split) {
                    Ok(()) => split.notify_ok(),
                    Err(e) => split.notify_err(EngineError::Validation(e.to_string())),
                }
            }
        }
    }

    /// Only one split may survive a drained group; later ones silently
    /// overwrite earlier ones (§4.C step 2, §9 OQ1, DESIGN.md #1).
    fn classify(&self, msg: IngestMessage, writes: &mut Vec<WriteBatch>, split: &mut Option<SplitTask>) {
        match msg {
            IngestMessage::Write(batch) => writes.push(batch),
            IngestMessage::Split(task) => *split = Some(task),
        }
    }

    fn execute_writes(&self, batches: &[WriteBatch]) -> Result<()> {
        let num_cfs = self.mem_stack.num_cfs();
        let mut per_cf: Vec<Vec<Entry>> = vec![Vec::new(); num_cfs];
        for batch in batches {
            for entry in &batch.entries {
                per_cf[entry.cf].push(entry.clone());
            }
        }
        for cf_entries in &mut per_cf {
            // Sorting happens even for single-batch groups: the memtable's
            // bulk insert path assumes sorted input (§4.C).
            cf_entries.sort_by(|a, b| a.key.cmp(&b.key));
        }

        let estimated_size: usize = per_cf
            .iter()
            .flat_map(|v| v.iter())
            .map(Entry::size_estimate)
            .sum();

        let mut head = self.mem_stack.head();
        if head.size() + estimated_size > self.mem_stack.max_memtable_size() {
            let old_head_size = head.size();
            let displaced = self.mem_stack.switch(estimated_size);
            let new_capacity = self.mem_stack.head().capacity();
            tracing::info!(old_head_size, new_capacity, "switching memtable");
            if let Some(old_head) = displaced {
                self.flush_tx.send(old_head)?;
            }
            head = self.mem_stack.head();
        }

        for (cf, entries) in per_cf.iter().enumerate() {
            if !entries.is_empty() {
                head.put_entries(cf, entries);
            }
        }
        Ok(())
    }
}
