//! Sort engine configuration.
//!
//! All sizing constants are validated once, at construction time, before
//! any stage thread is spawned. The hardware original enforced the same
//! constraints with compile-time static assertions; here a bad
//! configuration refuses to build a [`crate::BlockSorter`] instead.

use crate::errors::{Result, SortError};
use crate::record::Order;

/// Fan-in of the intra-block merge network: one insertion-sorted run stream
/// is distributed over this many lanes and merged back, quadrupling the run
/// length. Fixed by the pipeline topology.
pub const MERGE_FANIN: usize = 4;

/// Default insertion-sort unit size.
const DEFAULT_ISN: usize = 64;

/// Default on-chip block capacity.
const DEFAULT_BSN: usize = 16_384;

/// Default external escalation fan-in per pass.
const DEFAULT_MTCN: usize = 16;

/// Default escalation pass limit (matches the reference design's two
/// hard-coded passes; raise it for larger datasets).
const DEFAULT_ESCALATION_PASSES: u32 = 2;

/// Default bounded-lane depth.
const DEFAULT_CHANNEL_DEPTH: usize = 64;

/// Which comparison sort closes each `isn`-sized chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntraBlockSort {
    /// Stable binary-insertion sort. Required when equal-keyed records must
    /// keep their arrival order end-to-end.
    #[default]
    Insertion,
    /// Bitonic sorting network, the hardware-parity path. Deterministic but
    /// not FIFO-stable; short final chunks fall back to insertion sort.
    Bitonic,
}

/// Configuration for the sort pipeline.
///
/// Built with chained setters:
///
/// ```
/// use blocksort::{Order, SortConfig};
///
/// let config = SortConfig::new(Order::Ascending).isn(8).bsn(256).mtcn(4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SortConfig {
    /// Insertion-sort unit size (power of two, >= 4).
    pub isn: usize,
    /// On-chip block capacity (multiple of `isn * 4`; the quotient must be
    /// a power of two).
    pub bsn: usize,
    /// External escalation fan-in per pass (power of two, >= 2).
    pub mtcn: usize,
    /// Maximum number of external escalation passes.
    pub escalation_passes: u32,
    /// Sort direction.
    pub order: Order,
    /// Intra-block chunk sorter.
    pub intra_block: IntraBlockSort,
    /// Bounded-lane depth between stages.
    pub channel_depth: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self::new(Order::Ascending)
    }
}

impl SortConfig {
    /// Create a configuration with default sizing for the given direction.
    #[must_use]
    pub fn new(order: Order) -> Self {
        Self {
            isn: DEFAULT_ISN,
            bsn: DEFAULT_BSN,
            mtcn: DEFAULT_MTCN,
            escalation_passes: DEFAULT_ESCALATION_PASSES,
            order,
            intra_block: IntraBlockSort::default(),
            channel_depth: DEFAULT_CHANNEL_DEPTH,
        }
    }

    /// Set the insertion-sort unit size.
    #[must_use]
    pub fn isn(mut self, isn: usize) -> Self {
        self.isn = isn;
        self
    }

    /// Set the on-chip block capacity.
    #[must_use]
    pub fn bsn(mut self, bsn: usize) -> Self {
        self.bsn = bsn;
        self
    }

    /// Set the external escalation fan-in per pass.
    #[must_use]
    pub fn mtcn(mut self, mtcn: usize) -> Self {
        self.mtcn = mtcn;
        self
    }

    /// Set the escalation pass limit.
    #[must_use]
    pub fn escalation_passes(mut self, passes: u32) -> Self {
        self.escalation_passes = passes;
        self
    }

    /// Set the intra-block chunk sorter.
    #[must_use]
    pub fn intra_block(mut self, intra_block: IntraBlockSort) -> Self {
        self.intra_block = intra_block;
        self
    }

    /// Set the bounded-lane depth between stages.
    #[must_use]
    pub fn channel_depth(mut self, depth: usize) -> Self {
        self.channel_depth = depth;
        self
    }

    /// Number of lanes the ping-pong drain fans a full block out to.
    #[must_use]
    pub fn drain_lanes(&self) -> usize {
        self.bsn / (self.isn * MERGE_FANIN)
    }

    /// Largest input the configured escalation pass count can fully sort.
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        let mut cap = self.bsn;
        for _ in 0..self.escalation_passes {
            cap = cap.saturating_mul(self.mtcn);
        }
        cap
    }

    /// Validate all sizing constraints.
    pub fn validate(&self) -> Result<()> {
        if !self.isn.is_power_of_two() || self.isn < 4 {
            return Err(invalid("isn", "must be a power of two >= 4"));
        }
        let unit = self.isn * MERGE_FANIN;
        if self.bsn < unit || self.bsn % unit != 0 {
            return Err(invalid("bsn", "must be a positive multiple of isn * 4"));
        }
        if !self.drain_lanes().is_power_of_two() {
            return Err(invalid("bsn", "bsn / (isn * 4) must be a power of two"));
        }
        if !self.mtcn.is_power_of_two() || self.mtcn < 2 {
            return Err(invalid("mtcn", "must be a power of two >= 2"));
        }
        if self.channel_depth == 0 {
            return Err(invalid("channel_depth", "must be >= 1"));
        }
        Ok(())
    }
}

fn invalid(parameter: &str, reason: &str) -> SortError {
    SortError::InvalidConfig { parameter: parameter.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SortConfig::default().validate().is_ok());
    }

    #[test]
    fn test_small_reference_config() {
        // The small illustrative configuration: ISN=4, BSN=64, MTCN=4.
        let config = SortConfig::new(Order::Ascending).isn(4).bsn(64).mtcn(4);
        assert!(config.validate().is_ok());
        assert_eq!(config.drain_lanes(), 4);
        assert_eq!(config.max_capacity(), 64 * 4 * 4);
    }

    #[test]
    fn test_rejects_non_power_of_two_isn() {
        let config = SortConfig::default().isn(6);
        assert!(matches!(
            config.validate(),
            Err(SortError::InvalidConfig { parameter, .. }) if parameter == "isn"
        ));
    }

    #[test]
    fn test_rejects_tiny_isn() {
        let config = SortConfig::default().isn(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_misaligned_bsn() {
        let config = SortConfig::default().isn(4).bsn(50);
        assert!(matches!(
            config.validate(),
            Err(SortError::InvalidConfig { parameter, .. }) if parameter == "bsn"
        ));
    }

    #[test]
    fn test_rejects_non_power_of_two_drain_fanin() {
        // bsn / (isn * 4) = 3: a multiple of isn*4 but not a merge-tree fan-in.
        let config = SortConfig::default().isn(4).bsn(48);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_mtcn() {
        assert!(SortConfig::default().mtcn(3).validate().is_err());
        assert!(SortConfig::default().mtcn(1).validate().is_err());
    }

    #[test]
    fn test_rejects_zero_channel_depth() {
        assert!(SortConfig::default().channel_depth(0).validate().is_err());
    }

    #[test]
    fn test_max_capacity_scales_with_passes() {
        let config = SortConfig::default().isn(4).bsn(64).mtcn(4);
        assert_eq!(config.escalation_passes(0).max_capacity(), 64);
        assert_eq!(config.escalation_passes(1).max_capacity(), 256);
        assert_eq!(config.escalation_passes(2).max_capacity(), 1024);
    }
}
