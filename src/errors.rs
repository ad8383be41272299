//! Custom error types for blocksort operations.

use thiserror::Error;

/// Result type alias for blocksort operations
pub type Result<T> = std::result::Result<T, SortError>;

/// Error type for blocksort operations
///
/// Every variant is fatal at the point of detection: sorting has no
/// partial-failure semantics, so the pipeline is torn down and the error
/// surfaces to the invoking collaborator.
#[derive(Error, Debug)]
pub enum SortError {
    /// A configuration constant violates its power-of-two/divisibility constraints
    #[error("Invalid configuration '{parameter}': {reason}")]
    InvalidConfig {
        /// The configuration parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// One input lane to a merge stage ended while its sibling still had pending runs
    #[error("Stream desync in stage '{stage}': lane {lane} terminated prematurely")]
    StreamDesync {
        /// The stage that detected the mismatch
        stage: String,
        /// The lane (local index within the stage) that ended early
        lane: usize,
    },

    /// A scratch buffer was claimed for both roles, or roles failed to alternate
    #[error("Buffer ownership violation on scratch slot {slot}: {detail}")]
    BufferOwnership {
        /// Index of the offending scratch slot (0 or 1)
        slot: usize,
        /// Explanation of the violated handoff discipline
        detail: String,
    },

    /// Input size exceeds what the configured escalation passes can cover
    #[error(
        "Input of {real_sz} records exceeds the {max_capacity}-record capacity \
         of {passes} escalation pass(es)"
    )]
    CapacityExceeded {
        /// Total number of input records
        real_sz: usize,
        /// Maximum records the configured pass count can fully sort
        max_capacity: usize,
        /// The configured escalation pass limit
        passes: u32,
    },

    /// A stage observed the cooperative cancellation token while suspended
    #[error("Stage '{stage}' cancelled")]
    Cancelled {
        /// The stage that observed the cancellation
        stage: String,
    },

    /// A channel peer disappeared without a protocol-level end marker
    #[error("Channel closed unexpectedly in stage '{stage}'")]
    ChannelClosed {
        /// The stage whose channel endpoint failed
        stage: String,
    },

    /// A stage thread panicked
    #[error("Stage '{stage}' panicked")]
    StagePanicked {
        /// The stage whose thread panicked
        stage: String,
    },
}

impl SortError {
    /// True for errors that are knock-on effects of another stage failing
    /// first (useful for picking the root cause when joining many stages).
    #[must_use]
    pub fn is_secondary(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::ChannelClosed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_message() {
        let error = SortError::InvalidConfig {
            parameter: "isn".to_string(),
            reason: "must be a power of two >= 4".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Invalid configuration 'isn'"));
        assert!(msg.contains("power of two"));
    }

    #[test]
    fn test_stream_desync_message() {
        let error = SortError::StreamDesync { stage: "block_sort.merge[0.1]".to_string(), lane: 1 };
        let msg = format!("{error}");
        assert!(msg.contains("block_sort.merge[0.1]"));
        assert!(msg.contains("lane 1"));
    }

    #[test]
    fn test_capacity_exceeded_message() {
        let error = SortError::CapacityExceeded { real_sz: 2000, max_capacity: 1024, passes: 2 };
        let msg = format!("{error}");
        assert!(msg.contains("2000"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("2 escalation pass"));
    }

    #[test]
    fn test_secondary_classification() {
        assert!(SortError::Cancelled { stage: "x".into() }.is_secondary());
        assert!(SortError::ChannelClosed { stage: "x".into() }.is_secondary());
        assert!(!SortError::StagePanicked { stage: "x".into() }.is_secondary());
    }
}
