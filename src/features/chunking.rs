//! Deterministic chunk-slice computation (spec §4.3).

use super::indicator::Indicator;

/// `(read_start, read_end, drop_prefix)` for each chunk over an `n`-row
/// frame. Falls back to a single monolithic slice when `chunk_size <= 0`
/// or `chunk_size >= n`.
pub fn chunk_slices(n: usize, chunk_size: i64, overlap: i64) -> Vec<(usize, usize, usize)> {
    if chunk_size <= 0 || chunk_size as usize >= n {
        return vec![(0, n, 0)];
    }
    let chunk_size = chunk_size as usize;
    let overlap = overlap.max(0) as usize;
    let mut slices = Vec::new();
    let mut i = 0usize;
    let mut first = true;
    while i < n {
        let (read_start, read_end, drop_prefix) = if first {
            (0, chunk_size.min(n), 0)
        } else {
            let read_start = i.saturating_sub(overlap);
            let read_end = (i + chunk_size).min(n);
            (read_start, read_end, i - read_start)
        };
        slices.push((read_start, read_end, drop_prefix));
        first = false;
        i += chunk_size;
    }
    slices
}

/// `max(required_window) - 1` across all indicators, floored at 0.
pub fn required_overlap(indicators: &[Box<dyn Indicator>]) -> usize {
    indicators
        .iter()
        .map(|ind| ind.required_window())
        .max()
        .unwrap_or(1)
        .saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monolithic_fallback_when_chunk_size_non_positive() {
        assert_eq!(chunk_slices(100, 0, 5), vec![(0, 100, 0)]);
        assert_eq!(chunk_slices(100, -1, 5), vec![(0, 100, 0)]);
    }

    #[test]
    fn monolithic_fallback_when_chunk_size_covers_whole_frame() {
        assert_eq!(chunk_slices(100, 100, 5), vec![(0, 100, 0)]);
        assert_eq!(chunk_slices(100, 200, 5), vec![(0, 100, 0)]);
    }

    #[test]
    fn first_chunk_starts_at_zero_with_no_drop() {
        let slices = chunk_slices(100, 30, 5);
        assert_eq!(slices[0], (0, 30, 0));
    }

    #[test]
    fn subsequent_chunks_overlap_and_drop_the_overlap_prefix() {
        let slices = chunk_slices(100, 30, 5);
        // second chunk starts at i=30, read_start = max(0, 30-5) = 25
        assert_eq!(slices[1], (25, 60, 5));
        assert_eq!(slices[2], (55, 90, 5));
    }

    #[test]
    fn last_chunk_reads_to_frame_end() {
        let slices = chunk_slices(95, 30, 5);
        let last = *slices.last().unwrap();
        assert_eq!(last.1, 95);
    }
}
