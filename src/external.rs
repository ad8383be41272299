//! External escalation: the off-chip merge-sort tree.
//!
//! The ping-pong merger caps run length at `bsn`. When the input is larger
//! than one block, the sorted blocks are treated as runs in a buffer-resident
//! dataset and merged `mtcn` ways per pass, multiplying the run length until
//! a single run covers everything. Each pass reads runs out of one scratch
//! buffer through per-lane feeder stages, merges them through the same
//! network as the on-chip path, and collects the output into the partner
//! buffer. The pass count is bounded up front: an input the configured
//! passes cannot cover fails fast with [`SortError::CapacityExceeded`]
//! before any stage thread is spawned.

use std::cmp::min;
use std::sync::Arc;

use crate::config::SortConfig;
use crate::errors::{Result, SortError};
use crate::lane::{CancelToken, LaneMsg, join_stages, lane, spawn_stage};
use crate::merge::merge_tree;
use crate::record::{Record, SortKey};
use crate::scratch::{PassBuffers, ScratchPair};

/// Merge `records`, a concatenation of sorted runs each `config.bsn` long
/// (the final run possibly short), into one fully sorted vector.
///
/// Returns the sorted records and the number of escalation passes run.
/// Inputs of at most one block pass through untouched with zero passes.
pub fn escalate<K: SortKey, V: Clone + Send + Sync + 'static>(
    records: Vec<Record<K, V>>,
    config: &SortConfig,
    cancel: &CancelToken,
) -> Result<(Vec<Record<K, V>>, u32)> {
    let real_sz = records.len();
    if real_sz <= config.bsn {
        return Ok((records, 0));
    }

    // Bound the pass count before touching any buffer.
    let mut run_len = config.bsn;
    let mut needed = 0u32;
    while run_len < real_sz {
        run_len = run_len.saturating_mul(config.mtcn);
        needed += 1;
    }
    if needed > config.escalation_passes {
        return Err(SortError::CapacityExceeded {
            real_sz,
            max_capacity: config.max_capacity(),
            passes: config.escalation_passes,
        });
    }

    let mut pair = ScratchPair::from_initial(records);
    let mut run_len = config.bsn;
    for pass in 0..needed {
        log::debug!(
            "escalation pass {}/{needed}: merging {}-record runs {} ways",
            pass + 1,
            run_len,
            config.mtcn
        );
        run_len = merge_pass(&mut pair, real_sz, run_len, config, cancel)?;
    }

    let sorted = pair.into_drain()?;
    Ok((sorted, needed))
}

/// Run one escalation pass: every group of `mtcn` adjacent `run_len`-record
/// runs in the drain buffer is merged into a single run in the fill buffer.
/// Returns the run length after the pass.
fn merge_pass<K: SortKey, V: Clone + Send + Sync + 'static>(
    pair: &mut ScratchPair<Record<K, V>>,
    real_sz: usize,
    run_len: usize,
    config: &SortConfig,
    cancel: &CancelToken,
) -> Result<usize> {
    const STAGE: &str = "escalate.collect";
    let PassBuffers { mut fill, drain } = pair.begin_pass()?;
    let src = Arc::new(drain);
    let group_span = run_len.saturating_mul(config.mtcn);
    let groups = real_sz.div_ceil(group_span);

    let mut handles = Vec::new();
    let mut rxs = Vec::with_capacity(config.mtcn);
    for i in 0..config.mtcn {
        let (tx, rx) = lane(config.channel_depth, cancel);
        let src = Arc::clone(&src);
        let stage = format!("escalate.feed[{i}]");
        let stage_in = stage.clone();
        handles.push(spawn_stage(&stage, cancel, move || {
            let mut sent = 0u64;
            for g in 0..groups {
                // Run `i` of group `g`; clipped or empty past the true size.
                let start = min(g * group_span + i * run_len, real_sz);
                let end = min(start + run_len, real_sz);
                for rec in &src[start..end] {
                    tx.send_record(rec.clone()).map_err(|e| e.at(&stage_in))?;
                    sent += 1;
                }
                tx.end_run().map_err(|e| e.at(&stage_in))?;
            }
            tx.end_stream().map_err(|e| e.at(&stage_in))?;
            Ok(sent)
        }));
        rxs.push(rx);
    }

    let merged = merge_tree(rxs, config.order, config.channel_depth, cancel, "escalate", &mut handles)?;
    loop {
        match merged.recv().map_err(|e| e.at(STAGE))? {
            LaneMsg::Rec(rec) => fill.push(rec),
            LaneMsg::RunEnd => {}
            LaneMsg::StreamEnd => break,
        }
    }
    join_stages(handles)?;

    if fill.len() != real_sz {
        return Err(SortError::StreamDesync { stage: STAGE.to_string(), lane: 0 });
    }

    // All feeders have joined, so the source buffer is ours again.
    let drain = Arc::try_unwrap(src).unwrap_or_else(|arc| arc.as_ref().clone());
    pair.end_pass(fill, drain)?;
    Ok(group_span)
}
