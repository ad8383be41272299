//! In-place bitonic sorting network.
//!
//! The hardware-parity intra-block sorter: a fixed network of
//! compare-exchange stages whose shape depends only on the chunk length,
//! never on the data. The network is deterministic (equal keys never swap)
//! but not FIFO-stable, so it is only offered as an alternative to the
//! stable insertion sort for workloads that do not rely on tie order.
//!
//! Operates on power-of-two slices only; callers route short final chunks
//! to the insertion sorter instead.

use std::cmp::Ordering;

use crate::record::{Order, Record};

/// Sort a power-of-two slice with a bitonic network.
///
/// # Panics
///
/// Panics if the slice length is not a power of two; the configuration
/// layer guarantees `isn` is, so this indicates a caller bug.
pub fn bitonic_sort<K: Ord + Copy, V>(items: &mut [Record<K, V>], order: Order) {
    let n = items.len();
    if n < 2 {
        return;
    }
    assert!(n.is_power_of_two(), "bitonic network requires a power-of-two length, got {n}");

    let mut size = 2;
    while size <= n {
        let mut stride = size / 2;
        while stride > 0 {
            for i in 0..n {
                let j = i | stride;
                if j != i {
                    // Sub-blocks alternate direction; the final size == n
                    // stage leaves the whole slice in `order`.
                    let ascending_block = i & size == 0;
                    compare_exchange(items, i, j, ascending_block, order);
                }
            }
            stride /= 2;
        }
        size *= 2;
    }
}

/// Swap `items[i]` and `items[j]` if they are out of order for the block
/// direction. Equal keys never swap, so repeated runs are reproducible.
fn compare_exchange<K: Ord + Copy, V>(
    items: &mut [Record<K, V>],
    i: usize,
    j: usize,
    ascending_block: bool,
    order: Order,
) {
    let cmp = order.cmp_keys(&items[i].key, &items[j].key);
    let swap = if ascending_block { cmp == Ordering::Greater } else { cmp == Ordering::Less };
    if swap {
        items.swap(i, j);
    }
}
