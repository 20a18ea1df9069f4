//! Chunk progress for reconciliation runs

/// Remainders below this share of the total count as done.
const NEGLIGIBLE_REMAINDER: f64 = 0.01;

/// Tracks `processed / total` across chunk commits.
///
/// Values never decrease within a run and the final value is exactly `1.0`:
/// the fraction snaps to `1.0` once the remainder is below 1% of the total
/// or a chunk shorter than the nominal size has been committed.
#[derive(Debug, Clone)]
pub struct ChunkProgress {
    total: u64,
    chunk_size: usize,
    processed: u64,
    fraction: f32,
}

impl ChunkProgress {
    pub fn new(total: u64, chunk_size: usize) -> Self {
        Self {
            total,
            chunk_size: chunk_size.max(1),
            processed: 0,
            fraction: if total == 0 { 1.0 } else { 0.0 },
        }
    }

    /// Record a committed chunk of `len` items and return the new fraction.
    pub fn advance(&mut self, len: usize) -> f32 {
        self.processed = (self.processed + len as u64).min(self.total);
        if self.total == 0 {
            self.fraction = 1.0;
            return self.fraction;
        }

        let remaining = self.total - self.processed;
        let next = if remaining == 0
            || (remaining as f64) < self.total as f64 * NEGLIGIBLE_REMAINDER
            || len < self.chunk_size
        {
            1.0
        } else {
            (self.processed as f64 / self.total as f64) as f32
        };

        self.fraction = self.fraction.max(next);
        self.fraction
    }

    /// Mark the run done.
    pub fn finish(&mut self) -> f32 {
        self.fraction = 1.0;
        self.fraction
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn fraction(&self) -> f32 {
        self.fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(total: u64, chunk_size: usize) -> Vec<f32> {
        let mut progress = ChunkProgress::new(total, chunk_size);
        let mut values = Vec::new();
        let mut left = total as usize;
        while left > 0 {
            let len = left.min(chunk_size);
            values.push(progress.advance(len));
            left -= len;
        }
        values
    }

    #[test]
    fn test_fractions_are_monotonic_and_end_at_one() {
        for &(total, chunk) in &[(3u64, 1usize), (10, 3), (1000, 100), (1001, 100), (7, 50)] {
            let values = run(total, chunk);
            assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
            assert_eq!(*values.last().unwrap(), 1.0);
        }
    }

    #[test]
    fn test_short_final_chunk_snaps_to_one() {
        let mut progress = ChunkProgress::new(250, 100);
        assert_eq!(progress.advance(100), 0.4);
        assert_eq!(progress.advance(100), 0.8);
        assert_eq!(progress.advance(50), 1.0);
    }

    #[test]
    fn test_negligible_remainder_snaps_to_one() {
        let mut progress = ChunkProgress::new(10_000, 9_950);
        assert_eq!(progress.advance(9_950), 1.0);
        // Stays there for the trailing chunk
        assert_eq!(progress.advance(50), 1.0);
    }

    #[test]
    fn test_empty_run_is_complete() {
        let mut progress = ChunkProgress::new(0, 100);
        assert_eq!(progress.fraction(), 1.0);
        assert_eq!(progress.finish(), 1.0);
    }
}
