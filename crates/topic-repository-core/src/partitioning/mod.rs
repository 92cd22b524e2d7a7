//! Partition sizing for new topics.
//!
//! A topic's partition count is derived from its declared
//! [`ThroughputProfile`]: enough partitions for the requested read and write
//! parallelism, and enough for the sustained byte rate according to an
//! operator-supplied [`CalibrationTable`].

mod calculator;
mod calibration;

pub use calculator::{PartitionSizeCalculator, ThroughputProfile};
pub use calibration::{CalibrationTable, CalibrationTier};
