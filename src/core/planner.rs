use std::time::Duration;

pub const DEFAULT_MIN_BATCH: usize = 5;
pub const DEFAULT_MAX_BATCH: usize = 50;

/// How a phase's work-set is cut into batches and spread over an interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub delay: Duration,
}

impl BatchPlan {
    pub const EMPTY: BatchPlan = BatchPlan {
        batch_size: 0,
        delay: Duration::ZERO,
    };

    pub fn is_empty(&self) -> bool {
        self.batch_size == 0
    }

    pub fn num_batches(&self, total_items: usize) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        total_items.div_ceil(self.batch_size)
    }
}

/// Picks a batch size close to `total_items / interval` requests per second,
/// clamped to `[min_batch, max_batch]`, and the delay that spreads the
/// resulting batches evenly across `interval`.
///
/// `max_batch` wins over `min_batch` when the two conflict; the batch size is
/// never below 1 for a non-empty work-set.
pub fn plan(total_items: usize, interval: Duration, min_batch: usize, max_batch: usize) -> BatchPlan {
    if total_items == 0 {
        return BatchPlan::EMPTY;
    }

    let interval_secs = interval.as_secs_f64();
    let ideal = if interval_secs > 0.0 {
        (total_items as f64 / interval_secs).round_ties_even() as usize
    } else {
        total_items
    };

    let batch_size = ideal.max(1).max(min_batch).min(max_batch).max(1);
    let num_batches = total_items.div_ceil(batch_size);

    let delay = if num_batches > 1 {
        interval.div_f64(num_batches as f64)
    } else {
        Duration::ZERO
    };

    BatchPlan { batch_size, delay }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIFTEEN_MINUTES: Duration = Duration::from_secs(900);

    #[test]
    fn test_empty_work_set() {
        assert_eq!(plan(0, FIFTEEN_MINUTES, 5, 50), BatchPlan::EMPTY);
        assert!(plan(0, FIFTEEN_MINUTES, 5, 50).is_empty());
    }

    #[test]
    fn test_small_set_clamped_to_min_batch() {
        let p = plan(100, FIFTEEN_MINUTES, 5, 50);
        assert_eq!(p.batch_size, 5);
        assert_eq!(p.num_batches(100), 20);
        assert_eq!(p.delay, Duration::from_secs(45));
    }

    #[test]
    fn test_two_batches() {
        let p = plan(7, FIFTEEN_MINUTES, 5, 50);
        assert_eq!(p.batch_size, 5);
        assert_eq!(p.num_batches(7), 2);
        assert_eq!(p.delay, Duration::from_secs(450));
    }

    #[test]
    fn test_single_batch_has_no_delay() {
        let p = plan(3, FIFTEEN_MINUTES, 5, 50);
        assert_eq!(p.batch_size, 5);
        assert_eq!(p.num_batches(3), 1);
        assert_eq!(p.delay, Duration::ZERO);
    }

    #[test]
    fn test_large_set_clamped_to_max_batch() {
        // 100k / 900s ~ 111 req/s, ceiling is 50
        let p = plan(100_000, FIFTEEN_MINUTES, 5, 50);
        assert_eq!(p.batch_size, 50);
        assert_eq!(p.num_batches(100_000), 2000);
        assert!((p.delay.as_secs_f64() - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_ideal_rate_between_bounds() {
        let p = plan(9000, FIFTEEN_MINUTES, 5, 50);
        assert_eq!(p.batch_size, 10);
        assert_eq!(p.num_batches(9000), 900);
        assert_eq!(p.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_half_rates_round_to_even() {
        // 6.5 req/s
        let p = plan(5850, FIFTEEN_MINUTES, 5, 50);
        assert_eq!(p.batch_size, 6);
        assert_eq!(p.num_batches(5850), 975);

        // 5.5 req/s
        assert_eq!(plan(4950, FIFTEEN_MINUTES, 5, 50).batch_size, 6);
        // 7.5 req/s
        assert_eq!(plan(6750, FIFTEEN_MINUTES, 5, 50).batch_size, 8);
    }

    #[test]
    fn test_ceiling_wins_over_floor() {
        let p = plan(100, FIFTEEN_MINUTES, 10, 3);
        assert_eq!(p.batch_size, 3);
    }

    #[test]
    fn test_zero_bounds_never_yield_zero_batch() {
        let p = plan(10, FIFTEEN_MINUTES, 0, 0);
        assert_eq!(p.batch_size, 1);
        assert_eq!(p.num_batches(10), 10);
    }

    #[test]
    fn test_partition_covers_every_item() {
        for total in 1..=500 {
            for (min, max) in [(1, 1), (5, 50), (2, 7), (50, 50)] {
                let p = plan(total, Duration::from_secs(60), min, max);
                let batches = p.num_batches(total);
                assert!(p.batch_size >= min.min(max).max(1));
                assert!(p.batch_size <= max.max(1));
                assert!(batches * p.batch_size >= total);
                assert!((batches - 1) * p.batch_size < total);
            }
        }
    }
}
