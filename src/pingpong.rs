//! The ping-pong merger: on-chip block accumulation and drain.
//!
//! Alternates between two scratch buffers: while one is filled with the
//! next `bsn` records from the block-sort stage, the other (already full)
//! is fanned back out into `K = bsn / (isn * 4)` lanes — one per sorted
//! segment — and merged through the network into one fully sorted block on
//! the output lane. Fill and drain of a pass run concurrently; the buffers
//! themselves are exchanged only at pass boundaries through the
//! [`ScratchPair`] role ledger.
//!
//! The fill tracks the true element count it wrote, so the final short
//! group of a finite stream drains with its real length — trailing
//! segments simply become short or empty runs into the drain tree.

use std::cmp::min;

use crate::config::{MERGE_FANIN, SortConfig};
use crate::errors::{Result, SortError};
use crate::lane::{
    CancelToken, LaneMsg, LaneReceiver, LaneSender, StageHandle, join_stages, lane, spawn_stage,
};
use crate::merge::merge_tree;
use crate::record::{Order, Record, SortKey};
use crate::scratch::{PassBuffers, ScratchPair};

/// Spawn the ping-pong merger stage.
///
/// Consumes the flat block-sort output, emits a flat stream of sorted
/// blocks (each `bsn` records, the final one possibly short). The stage's
/// result is the number of blocks drained.
pub fn spawn_ping_pong<K: SortKey, V: Clone + Send + 'static>(
    input: LaneReceiver<K, V>,
    output: LaneSender<K, V>,
    config: &SortConfig,
    cancel: &CancelToken,
) -> StageHandle {
    const STAGE: &str = "ping_pong";
    let config = *config;
    let cancel_in = cancel.clone();
    spawn_stage(STAGE, cancel, move || {
        let bsn = config.bsn;
        let seg_len = config.isn * MERGE_FANIN;
        let lanes = config.drain_lanes();
        let mut pair: ScratchPair<Record<K, V>> = ScratchPair::with_capacity(bsn);
        let mut eof = false;
        let mut blocks = 0u64;
        loop {
            let PassBuffers { mut fill, drain } = pair.begin_pass()?;
            // Drain the previous pass's buffer while this pass fills.
            let mut drain_handles = Vec::new();
            if !drain.is_empty() {
                log::debug!("ping-pong pass {}: draining {} records", pair.pass(), drain.len());
                spawn_drain(
                    &drain,
                    seg_len,
                    lanes,
                    config.order,
                    config.channel_depth,
                    &cancel_in,
                    &output,
                    &mut drain_handles,
                )?;
                blocks += 1;
            }
            if !eof {
                eof = fill_block(&input, &mut fill, bsn)?;
            }
            join_stages(drain_handles)?;
            let fill_empty = fill.is_empty();
            pair.end_pass(fill, drain)?;
            if eof && fill_empty {
                break;
            }
        }
        output.end_stream().map_err(|e| e.at(STAGE))?;
        Ok(blocks)
    })
}

/// Accumulate up to `bsn` records into `buf`; true on end of stream.
fn fill_block<K: SortKey, V>(
    input: &LaneReceiver<K, V>,
    buf: &mut Vec<Record<K, V>>,
    bsn: usize,
) -> Result<bool> {
    const STAGE: &str = "ping_pong.fill";
    while buf.len() < bsn {
        match input.recv().map_err(|e| e.at(STAGE))? {
            LaneMsg::Rec(rec) => buf.push(rec),
            LaneMsg::RunEnd => {
                return Err(SortError::StreamDesync { stage: STAGE.to_string(), lane: 0 });
            }
            LaneMsg::StreamEnd => return Ok(true),
        }
    }
    Ok(false)
}

/// Fan a filled buffer out into one lane per segment and merge the lanes
/// into sorted output. Spawned stages land in `handles`; the caller joins
/// them once the concurrent fill finishes.
#[allow(clippy::too_many_arguments)]
fn spawn_drain<K: SortKey, V: Clone + Send + 'static>(
    drain: &[Record<K, V>],
    seg_len: usize,
    lanes: usize,
    order: Order,
    channel_depth: usize,
    cancel: &CancelToken,
    output: &LaneSender<K, V>,
    handles: &mut Vec<StageHandle>,
) -> Result<()> {
    let len = drain.len();
    let mut rxs = Vec::with_capacity(lanes);
    for i in 0..lanes {
        let (tx, rx) = lane(channel_depth, cancel);
        // Burst-copy the segment out of the buffer; segments past the true
        // fill count come out short or empty.
        let start = min(i * seg_len, len);
        let end = min(start + seg_len, len);
        let segment: Vec<Record<K, V>> = drain[start..end].to_vec();
        let stage = format!("ping_pong.feed[{i}]");
        let stage_in = stage.clone();
        handles.push(spawn_stage(&stage, cancel, move || {
            let n = segment.len() as u64;
            for rec in segment {
                tx.send_record(rec).map_err(|e| e.at(&stage_in))?;
            }
            tx.end_run().map_err(|e| e.at(&stage_in))?;
            tx.end_stream().map_err(|e| e.at(&stage_in))?;
            Ok(n)
        }));
        rxs.push(rx);
    }

    let merged = merge_tree(rxs, order, channel_depth, cancel, "ping_pong", handles)?;
    let out = output.clone();
    let expected = len as u64;
    handles.push(spawn_stage("ping_pong.collect", cancel, move || {
        const STAGE: &str = "ping_pong.collect";
        let mut n = 0u64;
        loop {
            match merged.recv().map_err(|e| e.at(STAGE))? {
                LaneMsg::Rec(rec) => {
                    out.send_record(rec).map_err(|e| e.at(STAGE))?;
                    n += 1;
                }
                LaneMsg::RunEnd => {}
                LaneMsg::StreamEnd => break,
            }
        }
        // Record conservation within the block.
        if n != expected {
            return Err(SortError::StreamDesync { stage: STAGE.to_string(), lane: 0 });
        }
        Ok(n)
    }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insert_sort::insertion_sort;

    /// Build a block-sort-shaped flat input: every `seg_len`-aligned
    /// segment sorted, final segment short.
    fn segment_sorted(keys: &[u64], seg_len: usize, order: Order) -> Vec<Record<u64, usize>> {
        let mut recs: Vec<Record<u64, usize>> =
            keys.iter().enumerate().map(|(i, &k)| Record::new(k, i)).collect();
        for chunk in recs.chunks_mut(seg_len) {
            insertion_sort(chunk, order);
        }
        recs
    }

    fn run_ping_pong(
        input: Vec<Record<u64, usize>>,
        config: &SortConfig,
    ) -> (Vec<u64>, u64) {
        let cancel = CancelToken::new();
        let (in_tx, in_rx) = lane(config.channel_depth, &cancel);
        let (out_tx, out_rx) = lane(config.channel_depth, &cancel);
        let stage = spawn_ping_pong(in_rx, out_tx, config, &cancel);

        let feeder = std::thread::spawn(move || {
            for rec in input {
                in_tx.send_record(rec).unwrap();
            }
            in_tx.end_stream().unwrap();
        });

        let mut flat = Vec::new();
        loop {
            match out_rx.recv().unwrap() {
                LaneMsg::Rec(r) => flat.push(r.key),
                LaneMsg::RunEnd => panic!("ping-pong output should be flat"),
                LaneMsg::StreamEnd => break,
            }
        }
        feeder.join().unwrap();
        let blocks = stage.handle.join().unwrap().unwrap();
        (flat, blocks)
    }

    #[test]
    fn test_single_full_block() {
        let config = SortConfig::new(Order::Ascending).isn(4).bsn(64).mtcn(4);
        let keys: Vec<u64> = (0..64).rev().collect();
        let input = segment_sorted(&keys, 16, Order::Ascending);
        let (flat, blocks) = run_ping_pong(input, &config);
        assert_eq!(blocks, 1);
        assert_eq!(flat, (0..64).collect::<Vec<u64>>());
    }

    #[test]
    fn test_multiple_blocks_each_sorted() {
        let config = SortConfig::new(Order::Ascending).isn(4).bsn(64).mtcn(4);
        let keys: Vec<u64> = (0..128).map(|i| (i * 37) % 128).collect();
        let input = segment_sorted(&keys, 16, Order::Ascending);
        let (flat, blocks) = run_ping_pong(input, &config);
        assert_eq!(blocks, 2);
        assert_eq!(flat.len(), 128);
        for block in flat.chunks(64) {
            assert!(block.is_sorted(), "block not sorted: {block:?}");
        }
    }

    #[test]
    fn test_short_final_group_true_length() {
        let config = SortConfig::new(Order::Ascending).isn(4).bsn(64).mtcn(4);
        // 70 records: one full block plus a 6-record final group.
        let keys: Vec<u64> = (0..70).rev().collect();
        let input = segment_sorted(&keys, 16, Order::Ascending);
        let (flat, blocks) = run_ping_pong(input, &config);
        assert_eq!(blocks, 2);
        assert_eq!(flat.len(), 70, "short group must be neither dropped nor padded");
        assert!(flat[64..].is_sorted());
    }

    #[test]
    fn test_empty_stream() {
        let config = SortConfig::new(Order::Ascending).isn(4).bsn(64).mtcn(4);
        let (flat, blocks) = run_ping_pong(Vec::new(), &config);
        assert_eq!(blocks, 0);
        assert!(flat.is_empty());
    }
}
