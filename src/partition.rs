//! Pure partitioning of an ordered item list across peers
//!
//! Every peer computes its slice independently from `(total, rank, size)`, so
//! the assignment is never persisted. Slices use ceiling division: each peer
//! but the last takes `ceil(total / size)` items and the last peer absorbs
//! whatever remains, which may be fewer items or none at all.

use std::ops::Range;

/// Compute the `[start, end)` slice owned by `peer_index` out of `peer_count`
///
/// Both bounds are clamped to `total_count`, so the slices for
/// `0..peer_count` are pairwise disjoint and cover `0..total_count` exactly
/// once, including when `total_count == 0` or `peer_count > total_count`.
///
/// # Panics
/// Panics if `peer_count == 0` or `peer_index >= peer_count`; a `Peer` value
/// never carries such a pair.
pub fn assign(total_count: usize, peer_index: usize, peer_count: usize) -> Range<usize> {
    assert!(peer_count > 0, "peer count must be at least 1");
    assert!(
        peer_index < peer_count,
        "peer index {} out of range for {} peers",
        peer_index,
        peer_count
    );

    let per_peer = total_count.div_ceil(peer_count);
    let start = peer_index.saturating_mul(per_peer).min(total_count);
    let end = if peer_index == peer_count - 1 {
        total_count
    } else {
        (peer_index + 1).saturating_mul(per_peer).min(total_count)
    };

    start..end
}

/// Borrow the slice of `items` owned by `peer_index`
pub fn slice_for<T>(items: &[T], peer_index: usize, peer_count: usize) -> &[T] {
    &items[assign(items.len(), peer_index, peer_count)]
}

/// All slices for a peer count, in rank order
pub fn plan(total_count: usize, peer_count: usize) -> Vec<Range<usize>> {
    (0..peer_count)
        .map(|rank| assign(total_count, rank, peer_count))
        .collect()
}
