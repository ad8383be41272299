//! Block insertion sort: the first stage of the pipeline.
//!
//! Consumes a flat input lane in chunks of exactly `isn` records, sorts
//! each chunk, and emits it as one run followed by a run marker. The final
//! chunk of a finite stream may be short; it is sorted and emitted with its
//! true length — never padded with sentinel keys.

use std::cmp::Ordering;

use crate::bitonic::bitonic_sort;
use crate::config::IntraBlockSort;
use crate::errors::{Result, SortError};
use crate::lane::{CancelToken, LaneMsg, LaneReceiver, LaneSender, StageHandle, spawn_stage};
use crate::record::{Order, Record, SortKey};

/// Stable binary-insertion sort.
///
/// Equal keys keep their arrival order, which the all-equal-keys stability
/// guarantee of the whole pipeline rests on.
pub fn insertion_sort<K: Ord + Copy, V>(items: &mut [Record<K, V>], order: Order) {
    for i in 1..items.len() {
        let key = items[i].key;
        // First position whose key sorts strictly after `key`; inserting
        // there keeps equal keys in arrival order.
        let pos = items[..i].partition_point(|r| order.cmp_keys(&r.key, &key) != Ordering::Greater);
        items[pos..=i].rotate_right(1);
    }
}

/// Sort one full or short chunk with the configured intra-block sorter.
fn sort_chunk<K: Ord + Copy, V>(chunk: &mut [Record<K, V>], order: Order, intra: IntraBlockSort) {
    match intra {
        IntraBlockSort::Insertion => insertion_sort(chunk, order),
        // The network needs a power-of-two length; short final chunks take
        // the insertion path.
        IntraBlockSort::Bitonic if chunk.len().is_power_of_two() => bitonic_sort(chunk, order),
        IntraBlockSort::Bitonic => insertion_sort(chunk, order),
    }
}

/// Spawn the block-insert-sort stage.
///
/// Reads a flat stream (`Rec* StreamEnd`), emits `isn`-sized sorted runs
/// (`(Rec^isn RunEnd)*`, final run possibly short) and the stream end.
/// Returns the stage handle; the stage's result is the total record count.
pub fn spawn_block_insert_sort<K: SortKey, V: Send + 'static>(
    input: LaneReceiver<K, V>,
    output: LaneSender<K, V>,
    order: Order,
    isn: usize,
    intra: IntraBlockSort,
    cancel: &CancelToken,
) -> StageHandle {
    const STAGE: &str = "block_insert_sort";
    spawn_stage(STAGE, cancel, move || {
        let mut chunk: Vec<Record<K, V>> = Vec::with_capacity(isn);
        let mut total = 0u64;
        loop {
            match input.recv().map_err(|e| e.at(STAGE))? {
                LaneMsg::Rec(rec) => {
                    chunk.push(rec);
                    total += 1;
                    if chunk.len() == isn {
                        emit_run(&mut chunk, &output, order, intra)?;
                    }
                }
                // The input is flat; a run marker here means the upstream
                // protocol is corrupted.
                LaneMsg::RunEnd => {
                    return Err(SortError::StreamDesync { stage: STAGE.to_string(), lane: 0 });
                }
                LaneMsg::StreamEnd => {
                    if !chunk.is_empty() {
                        emit_run(&mut chunk, &output, order, intra)?;
                    }
                    output.end_stream().map_err(|e| e.at(STAGE))?;
                    return Ok(total);
                }
            }
        }
    })
}

fn emit_run<K: SortKey, V>(
    chunk: &mut Vec<Record<K, V>>,
    output: &LaneSender<K, V>,
    order: Order,
    intra: IntraBlockSort,
) -> Result<()> {
    const STAGE: &str = "block_insert_sort";
    sort_chunk(chunk, order, intra);
    for rec in chunk.drain(..) {
        output.send_record(rec).map_err(|e| e.at(STAGE))?;
    }
    output.end_run().map_err(|e| e.at(STAGE))
}
