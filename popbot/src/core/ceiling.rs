//! Total-click ceiling helpers.

/// Size of the next batch, or `None` once the ceiling is reached.
///
/// - Unbounded runs always use `batch_size`.
/// - Bounded runs clamp to `max_total - total_sent`.
pub fn next_batch_size(batch_size: u64, max_total: Option<u64>, total_sent: u64) -> Option<u64> {
    match max_total {
        None => Some(batch_size),
        Some(max) => {
            let remaining = max.saturating_sub(total_sent);
            if remaining == 0 {
                None
            } else {
                Some(batch_size.min(remaining))
            }
        }
    }
}

/// Whether `total_sent` has hit a bounded ceiling.
pub fn ceiling_reached(max_total: Option<u64>, total_sent: u64) -> bool {
    max_total.is_some_and(|max| total_sent >= max)
}
