//! Record and ordering types for the sort engine.
//!
//! A [`Record`] is a fixed-shape (key, value) pair: the key is ordered and
//! drives every comparison; the value is an opaque payload carried alongside
//! the key through every stage without inspection. Records never split
//! across stages.
//!
//! [`Order`] is selected once per invocation and is the single comparison
//! point used by every stage, so ascending and descending sorts share all
//! merge logic.

use std::cmp::Ordering;

/// Marker trait for sortable keys.
///
/// Blanket-implemented for any ordered, copyable, thread-safe type, so
/// integer and (total-ordered wrapper) float keys work out of the box.
pub trait SortKey: Ord + Copy + Send + Sync + 'static {}

impl<T: Ord + Copy + Send + Sync + 'static> SortKey for T {}

/// A (key, value) pair flowing through the sort pipeline.
///
/// The value is never inspected by any stage; it only rides along with its
/// key. Total record count is conserved across every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<K, V> {
    /// Ordered sort key.
    pub key: K,
    /// Opaque payload.
    pub value: V,
}

impl<K, V> Record<K, V> {
    /// Create a record from a key and payload.
    #[must_use]
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

/// Sort direction, selected once per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Smallest key first.
    #[default]
    Ascending,
    /// Largest key first.
    Descending,
}

impl Order {
    /// Compare two keys under this direction.
    ///
    /// `Less` means `a` belongs before `b` in the output. Equal keys compare
    /// `Equal` in both directions; tie-breaking is the merge stages' job
    /// (left-lane-first), never the comparator's.
    #[must_use]
    pub fn cmp_keys<K: Ord>(self, a: &K, b: &K) -> Ordering {
        match self {
            Self::Ascending => a.cmp(b),
            Self::Descending => b.cmp(a),
        }
    }

    /// True if `a` may precede `b` in sorted output (non-strict).
    #[must_use]
    pub fn in_order<K: Ord>(self, a: &K, b: &K) -> bool {
        self.cmp_keys(a, b) != Ordering::Greater
    }
}
