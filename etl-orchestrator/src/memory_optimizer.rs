/// Shrinks the backfill batch size to keep one in-flight page within a
/// rough memory budget, based on the average row size observed in the
/// previous page. Historical tables can have rows an order of magnitude
/// larger than typical incremental-sync rows, so a fixed `batch_size` from
/// config is a starting point, not a guarantee.
pub struct MemoryOptimizer {
    configured_batch_size: usize,
    min_batch_size: usize,
    target_bytes_per_batch: usize,
}

impl MemoryOptimizer {
    #[must_use]
    pub fn new(configured_batch_size: usize, target_bytes_per_batch: usize) -> Self {
        Self {
            configured_batch_size: configured_batch_size.max(1),
            min_batch_size: 10,
            target_bytes_per_batch,
        }
    }

    /// Batch size to request for the next page, given the average row size
    /// (in bytes) observed in the last page. Returns the configured batch
    /// size until there is a sample to react to.
    #[must_use]
    pub fn next_batch_size(&self, observed_avg_row_bytes: usize) -> usize {
        if observed_avg_row_bytes == 0 {
            return self.configured_batch_size;
        }

        let budget_rows = self.target_bytes_per_batch / observed_avg_row_bytes;
        budget_rows.clamp(self.min_batch_size, self.configured_batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_configured_size_with_no_sample_yet() {
        let optimizer = MemoryOptimizer::new(500, 50_000_000);
        assert_eq!(optimizer.next_batch_size(0), 500);
    }

    #[test]
    fn shrinks_batch_size_for_large_rows() {
        let optimizer = MemoryOptimizer::new(500, 1_000_000);
        assert_eq!(optimizer.next_batch_size(10_000), 100);
    }

    #[test]
    fn never_shrinks_below_the_floor() {
        let optimizer = MemoryOptimizer::new(500, 1_000_000);
        assert_eq!(optimizer.next_batch_size(1_000_000), 10);
    }

    #[test]
    fn never_exceeds_the_configured_ceiling() {
        let optimizer = MemoryOptimizer::new(500, 1_000_000_000);
        assert_eq!(optimizer.next_batch_size(1), 500);
    }
}
