//! The pairwise merge network.
//!
//! A merge network is a static binary tree of pairwise stream mergers.
//! Each merger repeatedly pulls one run from each of its two input lanes
//! (suspending on whichever side is not ready — back-pressure does the
//! scheduling), two-pointer merges them, and emits one combined run. After
//! `log2(N)` layers, one lane remains carrying runs `N` times the original
//! length.
//!
//! # Protocol rules
//!
//! - Ties break *left-lane-first*: on equal keys the record from the
//!   lower-indexed input lane is emitted first, making the whole network
//!   deterministic and stable.
//! - A merger's stream ends only when **both** inputs end. One lane ending
//!   while its sibling still carries runs is fatal
//!   ([`SortError::StreamDesync`]): silent continuation would corrupt
//!   ordering downstream.
//! - Empty runs merge like any other; they exist so upstream distributors
//!   can balance per-lane run counts.
//!
//! The same network is instantiated at three scales: N=4 inside block
//! sorting, N=K in the ping-pong drain, and N=MTCN per escalation pass.

use crate::errors::{Result, SortError};
use crate::lane::{CancelToken, LaneMsg, LaneReceiver, LaneSender, StageHandle, lane, spawn_stage};
use crate::record::{Order, Record, SortKey};

/// Merge two lanes of equal-length runs into one lane of doubled runs.
///
/// Runs until both inputs signal stream end. Returns the number of run
/// pairs merged. `stage` names this merger in logs and errors; `lane 0` is
/// the left input, `lane 1` the right.
pub fn merge_pair<K: SortKey, V>(
    left: &LaneReceiver<K, V>,
    right: &LaneReceiver<K, V>,
    output: &LaneSender<K, V>,
    order: Order,
    stage: &str,
) -> Result<u64> {
    let mut runs = 0u64;
    loop {
        // First token of the next run on each side, or stream end.
        let l = left.recv().map_err(|e| e.at(stage))?;
        let r = right.recv().map_err(|e| e.at(stage))?;
        let (l_head, r_head) = match (l, r) {
            (LaneMsg::StreamEnd, LaneMsg::StreamEnd) => {
                output.end_stream().map_err(|e| e.at(stage))?;
                return Ok(runs);
            }
            (LaneMsg::StreamEnd, _) => {
                return Err(SortError::StreamDesync { stage: stage.to_string(), lane: 0 });
            }
            (_, LaneMsg::StreamEnd) => {
                return Err(SortError::StreamDesync { stage: stage.to_string(), lane: 1 });
            }
            (l, r) => (run_head(l), run_head(r)),
        };
        merge_one_run(left, right, output, order, stage, l_head, r_head)?;
        runs += 1;
    }
}

/// Interpret the first token of a run: `Some` record, or `None` for an
/// empty run.
fn run_head<K, V>(msg: LaneMsg<K, V>) -> Option<Record<K, V>> {
    match msg {
        LaneMsg::Rec(rec) => Some(rec),
        // RunEnd straight away: an empty run.
        LaneMsg::RunEnd | LaneMsg::StreamEnd => None,
    }
}

/// Classic two-pointer merge of one run from each side.
fn merge_one_run<K: SortKey, V>(
    left: &LaneReceiver<K, V>,
    right: &LaneReceiver<K, V>,
    output: &LaneSender<K, V>,
    order: Order,
    stage: &str,
    mut l_head: Option<Record<K, V>>,
    mut r_head: Option<Record<K, V>>,
) -> Result<()> {
    loop {
        match (l_head.take(), r_head.take()) {
            (Some(l), Some(r)) => {
                if order.in_order(&l.key, &r.key) {
                    output.send_record(l).map_err(|e| e.at(stage))?;
                    r_head = Some(r);
                    l_head = next_in_run(left, stage, 0)?;
                } else {
                    output.send_record(r).map_err(|e| e.at(stage))?;
                    l_head = Some(l);
                    r_head = next_in_run(right, stage, 1)?;
                }
            }
            (Some(l), None) => {
                output.send_record(l).map_err(|e| e.at(stage))?;
                l_head = next_in_run(left, stage, 0)?;
            }
            (None, Some(r)) => {
                output.send_record(r).map_err(|e| e.at(stage))?;
                r_head = next_in_run(right, stage, 1)?;
            }
            (None, None) => {
                return output.end_run().map_err(|e| e.at(stage));
            }
        }
    }
}

/// Pull the next record of the current run, or `None` at the run boundary.
fn next_in_run<K, V>(
    rx: &LaneReceiver<K, V>,
    stage: &str,
    lane_idx: usize,
) -> Result<Option<Record<K, V>>> {
    match rx.recv().map_err(|e| e.at(stage))? {
        LaneMsg::Rec(rec) => Ok(Some(rec)),
        LaneMsg::RunEnd => Ok(None),
        // Stream end inside an open run: the lane died mid-run.
        LaneMsg::StreamEnd => {
            Err(SortError::StreamDesync { stage: stage.to_string(), lane: lane_idx })
        }
    }
}

/// Build a merge tree over `lanes`, spawning one merger thread per tree
/// node, and return the single output lane.
///
/// `lanes.len()` must be a power of two (a single lane passes through
/// untouched). Spawned stages are appended to `handles`.
pub fn merge_tree<K: SortKey, V: Send + 'static>(
    mut lanes: Vec<LaneReceiver<K, V>>,
    order: Order,
    channel_depth: usize,
    cancel: &CancelToken,
    label: &str,
    handles: &mut Vec<StageHandle>,
) -> Result<LaneReceiver<K, V>> {
    if lanes.is_empty() || !lanes.len().is_power_of_two() {
        return Err(SortError::InvalidConfig {
            parameter: format!("{label}.lanes"),
            reason: format!("merge tree fan-in must be a power of two, got {}", lanes.len()),
        });
    }
    let mut layer = 0usize;
    while lanes.len() > 1 {
        let mut next = Vec::with_capacity(lanes.len() / 2);
        let mut pairs = lanes.into_iter();
        let mut idx = 0usize;
        while let (Some(left), Some(right)) = (pairs.next(), pairs.next()) {
            let (tx, rx) = lane(channel_depth, cancel);
            let stage = format!("{label}.merge[{layer}.{idx}]");
            let stage_in = stage.clone();
            handles.push(spawn_stage(&stage, cancel, move || {
                merge_pair(&left, &right, &tx, order, &stage_in)
            }));
            next.push(rx);
            idx += 1;
        }
        lanes = next;
        layer += 1;
    }
    Ok(lanes.remove(0))
}

/// Spawn the flatten stage: strip run markers, forwarding records and the
/// stream end. The stage's result is the record count.
pub fn spawn_flatten<K: SortKey, V: Send + 'static>(
    input: LaneReceiver<K, V>,
    output: LaneSender<K, V>,
    cancel: &CancelToken,
    label: &str,
) -> StageHandle {
    let stage = format!("{label}.flatten");
    let stage_in = stage.clone();
    spawn_stage(&stage, cancel, move || {
        let mut total = 0u64;
        loop {
            match input.recv().map_err(|e| e.at(&stage_in))? {
                LaneMsg::Rec(rec) => {
                    output.send_record(rec).map_err(|e| e.at(&stage_in))?;
                    total += 1;
                }
                LaneMsg::RunEnd => {}
                LaneMsg::StreamEnd => {
                    output.end_stream().map_err(|e| e.at(&stage_in))?;
                    return Ok(total);
                }
            }
        }
    })
}
