//! Batch publishing with per-item outcomes.
//!
//! A batch is a slice of [`BatchItem`]s owned by the caller for the duration
//! of [`BatchPublisher::publish`]. Every item ends the call in a terminal
//! status; the batch-level error only says how many failed, the details stay
//! on the items.

mod publisher;

pub use publisher::{BatchPublisher, INTERNAL_ERROR_DETAIL, TIMED_OUT_DETAIL};

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Lifecycle of one batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishingStatus {
    #[default]
    Pending,
    Submitted,
    Succeeded,
    Failed,
}

impl PublishingStatus {
    /// Stable label used for metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for PublishingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of publishing one item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct PublishResult {
    pub status: PublishingStatus,
    /// Human-readable failure reason, set only for `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PublishResult {
    #[must_use]
    pub fn submitted() -> Self {
        Self {
            status: PublishingStatus::Submitted,
            detail: None,
        }
    }

    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            status: PublishingStatus::Succeeded,
            detail: None,
        }
    }

    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: PublishingStatus::Failed,
            detail: Some(detail.into()),
        }
    }
}

/// One event of an outbound batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Target partition id. `None` lets the engine choose; the chosen
    /// partition is written back on success.
    pub partition: Option<String>,
    pub payload: Bytes,
    pub result: PublishResult,
}

impl BatchItem {
    /// An item for an engine-chosen partition.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            partition: None,
            payload: payload.into(),
            result: PublishResult::default(),
        }
    }

    /// An item pinned to `partition`.
    pub fn for_partition(partition: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            partition: Some(partition.into()),
            payload: payload.into(),
            result: PublishResult::default(),
        }
    }

    #[must_use]
    pub fn status(&self) -> PublishingStatus {
        self.result.status
    }

    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.result.detail.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_pending() {
        let item = BatchItem::for_partition("1", "payload");
        assert_eq!(item.status(), PublishingStatus::Pending);
        assert!(item.detail().is_none());
        assert!(!item.status().is_terminal());
    }

    #[test]
    fn test_failed_result_carries_detail() {
        let result = PublishResult::failed("timed out");
        assert!(result.status.is_terminal());
        assert_eq!(result.detail.as_deref(), Some("timed out"));
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_yaml::to_string(&PublishingStatus::Succeeded).unwrap();
        assert_eq!(json.trim(), "SUCCEEDED");
    }
}
