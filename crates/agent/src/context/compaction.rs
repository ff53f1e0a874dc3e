//! Budget compaction with a pin invariant.
//!
//! Segments are ordered so that the first non-pinned segment is the one to
//! drop next. While the total exceeds the budget and more than `min_segments`
//! remain, that segment is removed. Pinned segments are never removed; an
//! overage made of pinned segments alone is accepted.

use lantern_core::message::MemorySegment;

/// Total size of `segments`, in characters.
pub fn total_chars(segments: &[MemorySegment]) -> usize {
    segments.iter().map(MemorySegment::char_len).sum()
}

/// Drop non-pinned segments front to back until `segments` fits in
/// `budget_chars`.
pub fn compact(mut segments: Vec<MemorySegment>, budget_chars: usize, min_segments: usize) -> Vec<MemorySegment> {
    let mut total = total_chars(&segments);

    while total > budget_chars && segments.len() > min_segments {
        let Some(index) = segments.iter().position(|s| !s.pinned) else {
            break;
        };
        let removed = segments.remove(index);
        total -= removed.char_len();
    }

    segments
}
