//! Ping-pong scratch buffers with explicit role tracking.
//!
//! Two same-capacity buffers whose roles alternate every pass: the buffer
//! written by one pass is the buffer read by the next. The hardware design
//! guarantees non-overlap statically (a parity counter baked into the
//! template arguments); here the roles are reified as an owner/role ledger
//! so a violated handoff surfaces as [`SortError::BufferOwnership`] instead
//! of silent data corruption, and Rust's ownership rules enforce exclusive
//! access mechanically while a pass is running.

use crate::errors::{Result, SortError};

/// The two buffers of one pass, checked out of a [`ScratchPair`].
///
/// `fill` is empty and receives this pass's output; `drain` holds the
/// previous pass's output and is read-only by convention (it is returned
/// cleared at [`ScratchPair::end_pass`]).
#[derive(Debug)]
pub struct PassBuffers<T> {
    /// The write target for this pass.
    pub fill: Vec<T>,
    /// The read source for this pass.
    pub drain: Vec<T>,
}

/// A pair of same-capacity scratch buffers alternating fill/drain roles.
pub struct ScratchPair<T> {
    /// `None` while a slot is checked out to a pass.
    slots: [Option<Vec<T>>; 2],
    /// Which slot holds the fill role for the next pass.
    fill_idx: usize,
    /// Completed pass count; the fill index must track its parity.
    pass: u64,
}

impl<T> ScratchPair<T> {
    /// Two empty buffers, each with the given capacity reserved.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: [Some(Vec::with_capacity(capacity)), Some(Vec::new())],
            fill_idx: 0,
            pass: 0,
        }
    }

    /// A pair whose drain slot starts out holding `initial`.
    #[must_use]
    pub fn from_initial(initial: Vec<T>) -> Self {
        let capacity = initial.len();
        Self {
            slots: [Some(Vec::with_capacity(capacity)), Some(initial)],
            fill_idx: 0,
            pass: 0,
        }
    }

    /// Completed pass count.
    #[must_use]
    pub fn pass(&self) -> u64 {
        self.pass
    }

    /// Check both buffers out for one pass.
    ///
    /// Fails with [`SortError::BufferOwnership`] if either slot is already
    /// checked out (two passes claiming the same physical buffer) or if the
    /// fill index has drifted from the pass parity.
    pub fn begin_pass(&mut self) -> Result<PassBuffers<T>> {
        if self.fill_idx != (self.pass % 2) as usize {
            return Err(SortError::BufferOwnership {
                slot: self.fill_idx,
                detail: format!(
                    "fill role on slot {} does not match pass {} parity",
                    self.fill_idx, self.pass
                ),
            });
        }
        let fill = self.take_slot(self.fill_idx, "fill")?;
        let drain = self.take_slot(1 - self.fill_idx, "drain")?;
        Ok(PassBuffers { fill, drain })
    }

    /// Return both buffers at the end of a pass, clearing the drained one
    /// and swapping roles: what was filled this pass is drained next pass.
    pub fn end_pass(&mut self, fill: Vec<T>, mut drain: Vec<T>) -> Result<()> {
        if self.slots[0].is_some() || self.slots[1].is_some() {
            return Err(SortError::BufferOwnership {
                slot: self.fill_idx,
                detail: "end_pass without a matching begin_pass".to_string(),
            });
        }
        drain.clear();
        self.slots[self.fill_idx] = Some(fill);
        self.slots[1 - self.fill_idx] = Some(drain);
        self.fill_idx = 1 - self.fill_idx;
        self.pass += 1;
        Ok(())
    }

    /// Consume the pair, returning the buffer currently holding data (the
    /// drain slot of the next pass).
    pub fn into_drain(mut self) -> Result<Vec<T>> {
        let idx = 1 - self.fill_idx;
        self.slots[idx].take().ok_or_else(|| SortError::BufferOwnership {
            slot: idx,
            detail: "drain slot checked out at teardown".to_string(),
        })
    }

    fn take_slot(&mut self, idx: usize, role: &str) -> Result<Vec<T>> {
        self.slots[idx].take().ok_or_else(|| SortError::BufferOwnership {
            slot: idx,
            detail: format!("{role} slot already checked out"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_alternate_across_passes() {
        let mut pair: ScratchPair<u32> = ScratchPair::with_capacity(4);

        let PassBuffers { mut fill, drain } = pair.begin_pass().unwrap();
        assert!(drain.is_empty());
        fill.extend([1, 2, 3]);
        pair.end_pass(fill, drain).unwrap();

        // Pass 1 drains what pass 0 filled.
        let PassBuffers { fill, drain } = pair.begin_pass().unwrap();
        assert_eq!(drain, vec![1, 2, 3]);
        assert!(fill.is_empty());
        pair.end_pass(fill, drain).unwrap();
        assert_eq!(pair.pass(), 2);
    }

    #[test]
    fn test_double_begin_is_ownership_violation() {
        let mut pair: ScratchPair<u32> = ScratchPair::with_capacity(4);
        let _held = pair.begin_pass().unwrap();
        let err = pair.begin_pass().unwrap_err();
        assert!(matches!(err, SortError::BufferOwnership { .. }), "got {err}");
    }

    #[test]
    fn test_end_without_begin_is_ownership_violation() {
        let mut pair: ScratchPair<u32> = ScratchPair::with_capacity(4);
        let err = pair.end_pass(Vec::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, SortError::BufferOwnership { .. }));
    }

    #[test]
    fn test_from_initial_drains_first() {
        let mut pair = ScratchPair::from_initial(vec![7u32, 8, 9]);
        let PassBuffers { mut fill, drain } = pair.begin_pass().unwrap();
        assert_eq!(drain, vec![7, 8, 9]);
        fill.extend([10, 11]);
        pair.end_pass(fill, drain).unwrap();
        assert_eq!(pair.into_drain().unwrap(), vec![10, 11]);
    }

    #[test]
    fn test_into_drain_returns_latest_data() {
        let mut pair: ScratchPair<u32> = ScratchPair::with_capacity(2);
        let PassBuffers { mut fill, drain } = pair.begin_pass().unwrap();
        fill.push(42);
        pair.end_pass(fill, drain).unwrap();
        assert_eq!(pair.into_drain().unwrap(), vec![42]);
    }
}
