//! End-to-end sort pipeline orchestration.
//!
//! A [`BlockSorter`] wires the staged pipeline together for one dataset:
//!
//! ```text
//!   feed ──▶ block_sort ──▶ ping_pong ──▶ collect ──▶ escalate
//!            (isn runs,      (bsn-record    (caller     (mtcn-way
//!             4-way merge)    blocks)        thread)     passes)
//! ```
//!
//! Every stage before `collect` runs on its own thread, connected by
//! bounded lanes; the caller's thread drains the ping-pong output and then
//! drives the escalation passes. Stage errors are gathered at join time,
//! with the root-cause error preferred over the lane shutdowns it causes
//! downstream.

use anyhow::{Context, ensure};
use log::{debug, info};

use crate::block_sort::spawn_block_sort;
use crate::config::SortConfig;
use crate::errors::SortError;
use crate::external::escalate;
use crate::lane::{CancelToken, LaneMsg, join_stages, lane, spawn_stage};
use crate::pingpong::spawn_ping_pong;
use crate::record::{Order, Record, SortKey};

/// Counters from one [`BlockSorter::sort`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    /// Records fed into the pipeline.
    pub total_records: u64,
    /// Records that came out sorted. Always equals `total_records` on
    /// success; carried separately so callers can assert conservation.
    pub output_records: u64,
    /// Sorted blocks the ping-pong merger drained.
    pub blocks_built: u64,
    /// External escalation passes run.
    pub escalation_passes: u32,
}

/// The hierarchical block merge sorter.
///
/// Holds a validated [`SortConfig`] and a [`CancelToken`]; each call to
/// [`sort`](Self::sort) spawns a fresh set of stage threads and joins them
/// all before returning.
pub struct BlockSorter {
    config: SortConfig,
    cancel: CancelToken,
}

impl BlockSorter {
    /// Build a sorter, validating the configuration up front.
    pub fn new(config: SortConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config, cancel: CancelToken::new() })
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// A handle other threads can use to abort an in-flight sort.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Sort `records` end to end.
    ///
    /// Returns the fully sorted records and the run's [`SortStats`]. On any
    /// stage failure the remaining stages are cancelled, joined, and the
    /// root-cause error returned.
    pub fn sort<K: SortKey, V: Clone + Send + Sync + 'static>(
        &self,
        records: Vec<Record<K, V>>,
    ) -> anyhow::Result<(Vec<Record<K, V>>, SortStats)> {
        let total = records.len();
        if self.cancel.is_cancelled() {
            return Err(SortError::Cancelled { stage: "pipeline".to_string() }.into());
        }
        info!(
            "sorting {total} records (isn={}, bsn={}, mtcn={})",
            self.config.isn, self.config.bsn, self.config.mtcn
        );

        let cancel = &self.cancel;
        let mut handles = Vec::new();
        let (in_tx, in_rx) = lane(self.config.channel_depth, cancel);
        let flat_rx = spawn_block_sort(in_rx, &self.config, cancel, &mut handles)
            .context("failed to spawn block-sort stages")?;
        let (out_tx, out_rx) = lane(self.config.channel_depth, cancel);
        let ping_pong = spawn_ping_pong(flat_rx, out_tx, &self.config, cancel);

        handles.push(spawn_stage("pipeline.feed", cancel, move || {
            const STAGE: &str = "pipeline.feed";
            let mut fed = 0u64;
            for rec in records {
                in_tx.send_record(rec).map_err(|e| e.at(STAGE))?;
                fed += 1;
            }
            in_tx.end_stream().map_err(|e| e.at(STAGE))?;
            Ok(fed)
        }));

        // Drain sorted blocks on the caller's thread. On a lane failure,
        // stop collecting and let the join report the root cause.
        let mut blocks = Vec::with_capacity(total);
        let collect_err = loop {
            match out_rx.recv() {
                Ok(LaneMsg::Rec(rec)) => blocks.push(rec),
                Ok(LaneMsg::RunEnd) => {
                    break Some(SortError::StreamDesync {
                        stage: "pipeline.collect".to_string(),
                        lane: 0,
                    });
                }
                Ok(LaneMsg::StreamEnd) => break None,
                Err(e) => break Some(e.at("pipeline.collect")),
            }
        };
        if collect_err.is_some() {
            self.cancel.cancel();
        }

        let (blocks_built, merger_err) = match ping_pong.handle.join() {
            Ok(Ok(n)) => (n, None),
            Ok(Err(e)) => (0, Some(e)),
            Err(_) => (0, Some(SortError::StagePanicked { stage: ping_pong.name })),
        };
        // Root cause precedence: any stage's own primary error first, then
        // the knock-on lane shutdowns it caused elsewhere.
        let mut failure: Option<SortError> = None;
        let mut knock_on: Option<SortError> = None;
        let joined = join_stages(handles).err();
        for e in joined.into_iter().chain(merger_err).chain(collect_err) {
            if e.is_secondary() {
                knock_on.get_or_insert(e);
            } else {
                failure.get_or_insert(e);
            }
        }
        if let Some(e) = failure.or(knock_on) {
            return Err(e).context("sort pipeline failed");
        }

        ensure!(
            blocks.len() == total,
            "record count changed in flight: fed {total}, collected {}",
            blocks.len()
        );
        debug!("collected {} records in {blocks_built} sorted blocks", blocks.len());

        let (sorted, escalation_passes) =
            escalate(blocks, &self.config, cancel).context("external escalation failed")?;
        ensure!(
            sorted.len() == total,
            "record count changed during escalation: fed {total}, got {}",
            sorted.len()
        );
        info!("sorted {total} records ({blocks_built} blocks, {escalation_passes} passes)");

        let stats = SortStats {
            total_records: total as u64,
            output_records: sorted.len() as u64,
            blocks_built,
            escalation_passes,
        };
        Ok((sorted, stats))
    }
}

/// True when adjacent keys in `records` respect `order` (non-strictly).
#[must_use]
pub fn is_sorted<K: Ord + Copy, V>(records: &[Record<K, V>], order: Order) -> bool {
    records.windows(2).all(|w| order.in_order(&w[0].key, &w[1].key))
}
