//! Byte-rate to partition-count calibration table.
//!
//! The table is configuration data so it can be re-measured and redeployed
//! without touching code. Each tier reads "up to `bytes_per_second`
//! sustained, `partitions` partitions are enough".
//!
//! ```yaml
//! calibration:
//!   - { bytes_per_second: 1048576, partitions: 1 }
//!   - { bytes_per_second: 4194304, partitions: 2 }
//!   - { bytes_per_second: 16777216, partitions: 6 }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// One calibrated throughput tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CalibrationTier {
    /// Upper bound of the tier, in bytes per second.
    pub bytes_per_second: u64,
    /// Partitions needed to sustain this tier.
    pub partitions: u32,
}

impl CalibrationTier {
    #[must_use]
    pub fn new(bytes_per_second: u64, partitions: u32) -> Self {
        Self {
            bytes_per_second,
            partitions,
        }
    }
}

/// Validated, ordered list of tiers.
///
/// Thresholds grow strictly and partition counts never shrink, so lookups
/// are monotonic in the byte rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationTable {
    tiers: Vec<CalibrationTier>,
}

impl CalibrationTable {
    /// Build a table from tiers in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is empty, thresholds are not strictly
    /// increasing, a tier recommends zero partitions, or partition counts
    /// decrease.
    pub fn new(tiers: Vec<CalibrationTier>) -> ConfigResult<Self> {
        if tiers.is_empty() {
            return Err(ConfigError::EmptyCalibrationTable);
        }

        for (index, tier) in tiers.iter().enumerate() {
            if tier.partitions == 0 {
                return Err(ConfigError::ZeroPartitionTier { index });
            }
            if index == 0 {
                continue;
            }
            let previous = &tiers[index - 1];
            if tier.bytes_per_second <= previous.bytes_per_second {
                return Err(ConfigError::UnorderedCalibrationTier {
                    index,
                    bytes_per_second: tier.bytes_per_second,
                    previous: previous.bytes_per_second,
                });
            }
            if tier.partitions < previous.partitions {
                return Err(ConfigError::DecreasingCalibrationTier {
                    index,
                    partitions: tier.partitions,
                    previous: previous.partitions,
                });
            }
        }

        Ok(Self { tiers })
    }

    /// Partitions recommended for a sustained byte rate.
    ///
    /// Rates above the last tier saturate at the last tier.
    #[must_use]
    pub fn partitions_for(&self, bytes_per_second: u64) -> u32 {
        let index = self
            .tiers
            .partition_point(|tier| tier.bytes_per_second < bytes_per_second);
        self.tiers
            .get(index)
            .or_else(|| self.tiers.last())
            .map_or(1, |tier| tier.partitions)
    }

    #[must_use]
    pub fn tiers(&self) -> &[CalibrationTier] {
        &self.tiers
    }
}
