//! Recommended partition count from a throughput profile.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CalibrationTable;

/// Declared load of a topic, supplied when the topic is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ThroughputProfile {
    /// Expected number of parallel readers.
    pub read_parallelism: u32,
    /// Expected number of parallel writers.
    pub write_parallelism: u32,
    /// Sustained message rate.
    pub messages_per_minute: u32,
    /// Average message size in bytes.
    pub message_size: u32,
}

impl ThroughputProfile {
    /// Sustained byte rate in bytes per second.
    ///
    /// The product of two `u32` values always fits in a `u64`.
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.messages_per_minute) * u64::from(self.message_size) / 60
    }

    /// Partitions needed for the declared parallelism alone.
    #[must_use]
    pub fn parallelism(&self) -> u32 {
        self.read_parallelism.max(self.write_parallelism)
    }
}

/// Maps throughput profiles to partition counts.
#[derive(Debug, Clone)]
pub struct PartitionSizeCalculator {
    table: CalibrationTable,
}

impl PartitionSizeCalculator {
    #[must_use]
    pub fn new(table: CalibrationTable) -> Self {
        Self { table }
    }

    /// Recommend a partition count for `profile`.
    ///
    /// The result is the larger of the parallelism floor and the calibrated
    /// estimate, clamped to `[1, max_partitions]`. A `max_partitions` of zero
    /// is treated as one.
    #[must_use]
    pub fn recommend(&self, profile: &ThroughputProfile, max_partitions: u32) -> u32 {
        let upper = max_partitions.max(1);
        let parallelism = profile.parallelism();
        if parallelism >= upper {
            return upper;
        }

        let bytes_per_second = profile.bytes_per_second();
        let estimate = self.table.partitions_for(bytes_per_second);
        let partitions = parallelism.max(estimate).clamp(1, upper);

        debug!(
            bytes_per_second,
            parallelism,
            estimate,
            max_partitions = upper,
            partitions,
            "calculated partition count"
        );

        partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioning::CalibrationTier;

    fn calculator() -> PartitionSizeCalculator {
        PartitionSizeCalculator::new(
            CalibrationTable::new(vec![
                CalibrationTier::new(1 << 20, 1),
                CalibrationTier::new(4 << 20, 2),
                CalibrationTier::new(16 << 20, 4),
                CalibrationTier::new(64 << 20, 6),
            ])
            .unwrap(),
        )
    }

    fn profile(parallelism: u32, messages_per_minute: u32, message_size: u32) -> ThroughputProfile {
        ThroughputProfile {
            read_parallelism: parallelism,
            write_parallelism: 1,
            messages_per_minute,
            message_size,
        }
    }

    #[test]
    fn test_byte_rate_does_not_overflow() {
        let p = profile(1, 1_000_000_000, 1_000_000_000);
        assert_eq!(p.bytes_per_second(), 16_666_666_666_666_666);

        let max = profile(1, u32::MAX, u32::MAX);
        assert_eq!(
            max.bytes_per_second(),
            u64::from(u32::MAX) * u64::from(u32::MAX) / 60
        );
    }

    #[test]
    fn test_extreme_throughput_is_bounded() {
        let p = profile(1, 1_000_000_000, 1_000_000_000);
        assert_eq!(calculator().recommend(&p, 1000), 6);
        assert_eq!(calculator().recommend(&p, 3), 3);
    }

    #[test]
    fn test_parallelism_floor() {
        let p = profile(5, 10, 10);
        assert_eq!(calculator().recommend(&p, 100), 5);
    }

    #[test]
    fn test_parallelism_above_max_is_clamped() {
        let p = profile(500, 10, 10);
        assert_eq!(calculator().recommend(&p, 100), 100);
    }

    #[test]
    fn test_idle_topic_gets_one_partition() {
        let p = ThroughputProfile::default();
        assert_eq!(calculator().recommend(&p, 100), 1);
    }

    #[test]
    fn test_zero_max_is_treated_as_one() {
        let p = profile(8, 1_000_000, 1_000);
        assert_eq!(calculator().recommend(&p, 0), 1);
    }

    #[test]
    fn test_monotonic_in_byte_rate() {
        let calc = calculator();
        let mut previous = 0;
        for messages_per_minute in (0..=200_000_000u32).step_by(1_000_000) {
            let count = calc.recommend(&profile(1, messages_per_minute, 1_000), 1000);
            assert!(count >= previous, "count dropped at {messages_per_minute}");
            assert!((1..=1000).contains(&count));
            previous = count;
        }
    }
}
