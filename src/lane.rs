//! Lanes: bounded channels carrying the two-level run/stream protocol.
//!
//! A lane is one parallel channel of the sort fabric. It carries records
//! plus two side signals made explicit as enum variants:
//!
//! - [`LaneMsg::RunEnd`] closes the current run (a maximal sorted
//!   subsequence). Downstream mergers rely on run boundaries to know when
//!   to stop merging one pair of runs and start the next.
//! - [`LaneMsg::StreamEnd`] closes the lane as a whole. A lane's lifetime
//!   is `(Rec* RunEnd)* StreamEnd`; a *flat* lane omits run markers and is
//!   just `Rec* StreamEnd`.
//!
//! Empty runs (`RunEnd` with no preceding records) are legal; the block
//! distributor uses them to balance per-lane run counts.
//!
//! # Back-pressure and cancellation
//!
//! Lanes are bounded: a full lane suspends its producer, an empty lane
//! suspends its consumer. Every suspension point polls a shared
//! [`CancelToken`] so a dead peer cannot hang the pipeline forever; a
//! cancelled stage fails with [`SortError::Cancelled`] instead of blocking.

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::errors::{Result, SortError};
use crate::record::Record;

/// How often a suspended lane endpoint re-checks the cancellation token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One message on a lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneMsg<K, V> {
    /// A record within the current run.
    Rec(Record<K, V>),
    /// End of the current run.
    RunEnd,
    /// End of the whole lane.
    StreamEnd,
}

/// Cooperative cancellation token shared by every stage of one pipeline.
///
/// Any stage that fails sets the token; all other stages observe it at
/// their next channel suspension and unwind.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every stage holding this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once any holder has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Error from a single lane operation, before stage attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneError {
    /// The peer endpoint was dropped without an end marker.
    Closed,
    /// The shared cancellation token fired while suspended.
    Cancelled,
}

impl LaneError {
    /// Attach the detecting stage's name, producing a [`SortError`].
    #[must_use]
    pub fn at(self, stage: &str) -> SortError {
        match self {
            Self::Closed => SortError::ChannelClosed { stage: stage.to_string() },
            Self::Cancelled => SortError::Cancelled { stage: stage.to_string() },
        }
    }
}

/// Producing endpoint of a lane.
#[derive(Debug)]
pub struct LaneSender<K, V> {
    tx: Sender<LaneMsg<K, V>>,
    cancel: CancelToken,
}

/// Consuming endpoint of a lane.
#[derive(Debug)]
pub struct LaneReceiver<K, V> {
    rx: Receiver<LaneMsg<K, V>>,
    cancel: CancelToken,
}

/// Create a bounded lane whose endpoints share `cancel`.
#[must_use]
pub fn lane<K, V>(depth: usize, cancel: &CancelToken) -> (LaneSender<K, V>, LaneReceiver<K, V>) {
    let (tx, rx) = bounded(depth);
    (
        LaneSender { tx, cancel: cancel.clone() },
        LaneReceiver { rx, cancel: cancel.clone() },
    )
}

impl<K, V> Clone for LaneSender<K, V> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), cancel: self.cancel.clone() }
    }
}

impl<K, V> LaneSender<K, V> {
    /// Send one message, blocking under back-pressure.
    pub fn send(&self, msg: LaneMsg<K, V>) -> std::result::Result<(), LaneError> {
        let mut msg = msg;
        loop {
            if self.cancel.is_cancelled() {
                return Err(LaneError::Cancelled);
            }
            match self.tx.send_timeout(msg, CANCEL_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(m)) => msg = m,
                Err(SendTimeoutError::Disconnected(_)) => return Err(LaneError::Closed),
            }
        }
    }

    /// Send one record within the current run.
    pub fn send_record(&self, rec: Record<K, V>) -> std::result::Result<(), LaneError> {
        self.send(LaneMsg::Rec(rec))
    }

    /// Close the current run.
    pub fn end_run(&self) -> std::result::Result<(), LaneError> {
        self.send(LaneMsg::RunEnd)
    }

    /// Close the lane.
    pub fn end_stream(&self) -> std::result::Result<(), LaneError> {
        self.send(LaneMsg::StreamEnd)
    }

    /// The cancellation token this endpoint polls.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

impl<K, V> LaneReceiver<K, V> {
    /// Receive the next message, blocking until one is available.
    pub fn recv(&self) -> std::result::Result<LaneMsg<K, V>, LaneError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(LaneError::Cancelled);
            }
            match self.rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(msg) => return Ok(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(LaneError::Closed),
            }
        }
    }

    /// The cancellation token this endpoint polls.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// A spawned pipeline stage: its name plus the join handle carrying its
/// result (an item count on success).
pub struct StageHandle {
    /// Stage name, used in logs and error attribution.
    pub name: String,
    /// Join handle for the stage thread.
    pub handle: JoinHandle<Result<u64>>,
}

/// Spawn a pipeline stage thread.
///
/// On failure the stage logs, fires the shared cancellation token (so peers
/// unwind instead of blocking forever), and reports the error through its
/// handle.
pub fn spawn_stage<F>(name: &str, cancel: &CancelToken, f: F) -> StageHandle
where
    F: FnOnce() -> Result<u64> + Send + 'static,
{
    let cancel = cancel.clone();
    let name = name.to_string();
    let thread_name = name.clone();
    let handle = thread::spawn(move || match f() {
        Ok(n) => Ok(n),
        Err(e) => {
            log::error!("stage '{thread_name}' failed: {e}");
            cancel.cancel();
            Err(e)
        }
    });
    StageHandle { name, handle }
}

/// Join a set of stages, surfacing the root-cause error if any failed.
///
/// Knock-on errors (`Cancelled`, `ChannelClosed`) are only reported when no
/// stage failed with a primary error.
pub fn join_stages(handles: Vec<StageHandle>) -> Result<()> {
    let mut primary: Option<SortError> = None;
    let mut secondary: Option<SortError> = None;
    for stage in handles {
        match stage.handle.join() {
            Ok(Ok(n)) => log::debug!("stage '{}' done ({n} items)", stage.name),
            Ok(Err(e)) => {
                if e.is_secondary() {
                    secondary.get_or_insert(e);
                } else {
                    primary.get_or_insert(e);
                }
            }
            Err(_) => {
                primary.get_or_insert(SortError::StagePanicked { stage: stage.name });
            }
        }
    }
    match (primary, secondary) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_roundtrip() {
        let cancel = CancelToken::new();
        let (tx, rx) = lane::<u32, u32>(8, &cancel);

        tx.send_record(Record::new(1, 10)).unwrap();
        tx.end_run().unwrap();
        tx.end_stream().unwrap();

        assert_eq!(rx.recv().unwrap(), LaneMsg::Rec(Record::new(1, 10)));
        assert_eq!(rx.recv().unwrap(), LaneMsg::RunEnd);
        assert_eq!(rx.recv().unwrap(), LaneMsg::StreamEnd);
    }

    #[test]
    fn test_recv_unblocks_on_cancel() {
        let cancel = CancelToken::new();
        let (_tx, rx) = lane::<u32, u32>(1, &cancel);

        let waiter = thread::spawn(move || rx.recv());
        thread::sleep(Duration::from_millis(5));
        cancel.cancel();

        assert_eq!(waiter.join().unwrap(), Err(LaneError::Cancelled));
    }

    #[test]
    fn test_send_unblocks_on_cancel() {
        let cancel = CancelToken::new();
        let (tx, _rx) = lane::<u32, u32>(1, &cancel);
        tx.send_record(Record::new(0, 0)).unwrap(); // fills the lane

        let cancel2 = cancel.clone();
        let sender = thread::spawn(move || {
            let res = tx.send_record(Record::new(1, 1));
            drop(tx);
            res
        });
        thread::sleep(Duration::from_millis(5));
        cancel2.cancel();

        assert_eq!(sender.join().unwrap(), Err(LaneError::Cancelled));
    }

    #[test]
    fn test_closed_lane_reports_closed() {
        let cancel = CancelToken::new();
        let (tx, rx) = lane::<u32, u32>(1, &cancel);
        drop(rx);
        assert_eq!(tx.send_record(Record::new(0, 0)), Err(LaneError::Closed));
    }

    #[test]
    fn test_failed_stage_fires_cancel() {
        let cancel = CancelToken::new();
        let stage = spawn_stage("failing", &cancel, || {
            Err(SortError::StreamDesync { stage: "failing".into(), lane: 0 })
        });
        let err = join_stages(vec![stage]).unwrap_err();
        assert!(matches!(err, SortError::StreamDesync { .. }));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_join_prefers_primary_error() {
        let cancel = CancelToken::new();
        let s1 = spawn_stage("knock-on", &cancel, || {
            Err(SortError::Cancelled { stage: "knock-on".into() })
        });
        let s2 = spawn_stage("root", &cancel, || {
            Err(SortError::StreamDesync { stage: "root".into(), lane: 1 })
        });
        let err = join_stages(vec![s1, s2]).unwrap_err();
        assert!(matches!(err, SortError::StreamDesync { lane: 1, .. }));
    }
}
