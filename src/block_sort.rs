//! Block sorting: insertion-sorted runs fanned across a 4-lane merge tree.
//!
//! Composition: block insertion sort → 1-to-4 run distributor →
//! merge tree (N=4) → flatten. The output is a flat stream whose every
//! `isn * 4`-aligned segment is one sorted run (the final segment possibly
//! short), ready for the ping-pong merger to accumulate into blocks.
//!
//! The stage has no state beyond the composition; a failure in any
//! sub-stage propagates unchanged.

use crate::config::{MERGE_FANIN, SortConfig};
use crate::errors::{Result, SortError};
use crate::insert_sort::spawn_block_insert_sort;
use crate::lane::{CancelToken, LaneMsg, LaneReceiver, LaneSender, StageHandle, lane, spawn_stage};
use crate::merge::{merge_tree, spawn_flatten};
use crate::record::SortKey;

/// Spawn the run distributor: route whole runs round-robin across `n`
/// output lanes.
///
/// After the input ends, trailing lanes that received fewer runs are padded
/// with empty runs so every lane carries the same run count — the merge
/// tree would otherwise desync whenever the total run count is not a
/// multiple of `n`. The stage's result is the number of real runs routed.
pub fn spawn_distribute<K: SortKey, V: Send + 'static>(
    input: LaneReceiver<K, V>,
    outputs: Vec<LaneSender<K, V>>,
    cancel: &CancelToken,
    label: &str,
) -> StageHandle {
    let stage = format!("{label}.distribute");
    let stage_in = stage.clone();
    spawn_stage(&stage, cancel, move || {
        let n = outputs.len();
        let mut target = 0usize;
        let mut in_run = false;
        let mut runs = vec![0u64; n];
        loop {
            match input.recv().map_err(|e| e.at(&stage_in))? {
                LaneMsg::Rec(rec) => {
                    in_run = true;
                    outputs[target].send_record(rec).map_err(|e| e.at(&stage_in))?;
                }
                LaneMsg::RunEnd => {
                    in_run = false;
                    outputs[target].end_run().map_err(|e| e.at(&stage_in))?;
                    runs[target] += 1;
                    target = (target + 1) % n;
                }
                LaneMsg::StreamEnd => {
                    if in_run {
                        // Upstream died without closing its run.
                        return Err(SortError::StreamDesync { stage: stage_in, lane: 0 });
                    }
                    let max_runs = runs.iter().copied().max().unwrap_or(0);
                    for (out, &count) in outputs.iter().zip(&runs) {
                        for _ in count..max_runs {
                            out.end_run().map_err(|e| e.at(&stage_in))?;
                        }
                        out.end_stream().map_err(|e| e.at(&stage_in))?;
                    }
                    return Ok(runs.iter().sum());
                }
            }
        }
    })
}

/// Spawn the full block-sort composition over a flat input lane.
///
/// Returns the flat output lane; spawned stages are appended to `handles`.
pub fn spawn_block_sort<K: SortKey, V: Send + 'static>(
    input: LaneReceiver<K, V>,
    config: &SortConfig,
    cancel: &CancelToken,
    handles: &mut Vec<StageHandle>,
) -> Result<LaneReceiver<K, V>> {
    let depth = config.channel_depth;
    let order = config.order;

    let (sorted_tx, sorted_rx) = lane(depth, cancel);
    handles.push(spawn_block_insert_sort(
        input,
        sorted_tx,
        order,
        config.isn,
        config.intra_block,
        cancel,
    ));

    let mut fan_txs = Vec::with_capacity(MERGE_FANIN);
    let mut fan_rxs = Vec::with_capacity(MERGE_FANIN);
    for _ in 0..MERGE_FANIN {
        let (tx, rx) = lane(depth, cancel);
        fan_txs.push(tx);
        fan_rxs.push(rx);
    }
    handles.push(spawn_distribute(sorted_rx, fan_txs, cancel, "block_sort"));

    let merged_rx = merge_tree(fan_rxs, order, depth, cancel, "block_sort", handles)?;

    let (flat_tx, flat_rx) = lane(depth, cancel);
    handles.push(spawn_flatten(merged_rx, flat_tx, cancel, "block_sort"));
    Ok(flat_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::join_stages;
    use crate::record::{Order, Record};

    fn collect_runs(rx: &LaneReceiver<u64, usize>) -> Vec<Vec<u64>> {
        let mut runs = Vec::new();
        let mut current = Vec::new();
        loop {
            match rx.recv().unwrap() {
                LaneMsg::Rec(r) => current.push(r.key),
                LaneMsg::RunEnd => runs.push(std::mem::take(&mut current)),
                LaneMsg::StreamEnd => return runs,
            }
        }
    }

    #[test]
    fn test_distribute_balances_run_counts() {
        let cancel = CancelToken::new();
        let (in_tx, in_rx) = lane(64, &cancel);
        let mut rxs = Vec::new();
        let mut txs = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = lane(64, &cancel);
            txs.push(tx);
            rxs.push(rx);
        }
        let stage = spawn_distribute(in_rx, txs, &cancel, "test");

        // Six runs: lanes 0 and 1 get two, lanes 2 and 3 get one plus an
        // empty padding run.
        for run in 0..6u64 {
            in_tx.send_record(Record::new(run, 0)).unwrap();
            in_tx.end_run().unwrap();
        }
        in_tx.end_stream().unwrap();
        assert_eq!(stage.handle.join().unwrap().unwrap(), 6);

        assert_eq!(collect_runs(&rxs[0]), vec![vec![0], vec![4]]);
        assert_eq!(collect_runs(&rxs[1]), vec![vec![1], vec![5]]);
        assert_eq!(collect_runs(&rxs[2]), vec![vec![2], vec![]]);
        assert_eq!(collect_runs(&rxs[3]), vec![vec![3], vec![]]);
    }

    #[test]
    fn test_distribute_empty_stream() {
        let cancel = CancelToken::new();
        let (in_tx, in_rx) = lane::<u64, usize>(8, &cancel);
        let mut rxs = Vec::new();
        let mut txs = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = lane(8, &cancel);
            txs.push(tx);
            rxs.push(rx);
        }
        let stage = spawn_distribute(in_rx, txs, &cancel, "test");
        in_tx.end_stream().unwrap();
        assert_eq!(stage.handle.join().unwrap().unwrap(), 0);
        for rx in &rxs {
            assert!(collect_runs(rx).is_empty());
        }
    }

    #[test]
    fn test_block_sort_produces_aligned_sorted_segments() {
        let config = SortConfig::new(Order::Ascending).isn(4).bsn(64).mtcn(4);
        let cancel = CancelToken::new();
        let mut handles = Vec::new();
        let (in_tx, in_rx) = lane(64, &cancel);
        let out = spawn_block_sort(in_rx, &config, &cancel, &mut handles).unwrap();

        // 40 records: two full 16-record segments plus a short 8-record one.
        let keys: Vec<u64> = (0..40).rev().collect();
        let feeder = std::thread::spawn(move || {
            for (i, k) in keys.into_iter().enumerate() {
                in_tx.send_record(Record::new(k, i)).unwrap();
            }
            in_tx.end_stream().unwrap();
        });

        let mut flat = Vec::new();
        loop {
            match out.recv().unwrap() {
                LaneMsg::Rec(r) => flat.push(r.key),
                LaneMsg::RunEnd => panic!("block sort output should be flat"),
                LaneMsg::StreamEnd => break,
            }
        }
        feeder.join().unwrap();
        join_stages(handles).unwrap();

        assert_eq!(flat.len(), 40);
        // Every isn*4 = 16 aligned segment is internally sorted.
        for segment in flat.chunks(16) {
            assert!(segment.is_sorted(), "segment not sorted: {segment:?}");
        }
        // Conservation: the output is a permutation of the input.
        let mut sorted = flat.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..40).collect::<Vec<u64>>());
    }

    #[test]
    fn test_block_sort_exactly_one_segment() {
        let config = SortConfig::new(Order::Descending).isn(4).bsn(64).mtcn(4);
        let cancel = CancelToken::new();
        let mut handles = Vec::new();
        let (in_tx, in_rx) = lane(64, &cancel);
        let out = spawn_block_sort(in_rx, &config, &cancel, &mut handles).unwrap();

        let feeder = std::thread::spawn(move || {
            for k in 0..16u64 {
                in_tx.send_record(Record::new(k, 0usize)).unwrap();
            }
            in_tx.end_stream().unwrap();
        });

        let mut flat = Vec::new();
        loop {
            match out.recv().unwrap() {
                LaneMsg::Rec(r) => flat.push(r.key),
                LaneMsg::RunEnd => unreachable!(),
                LaneMsg::StreamEnd => break,
            }
        }
        feeder.join().unwrap();
        join_stages(handles).unwrap();
        assert_eq!(flat, (0..16u64).rev().collect::<Vec<_>>());
    }
}
