//! Portable cursors and their translation to engine read positions.
//!
//! A cursor is the `(partition, offset)` pair a consumer hands back to resume
//! reading. The offset names the last event already consumed, either as a
//! decimal sequence number or as the [`BEFORE_OLDEST_OFFSET`] sentinel.
//!
//! - [`codec`] parses and renders offsets
//! - [`validator`] checks cursors against a partition snapshot

pub mod codec;
pub mod validator;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use codec::{is_sentinel, parse_offset, CursorOffset, BEFORE_OLDEST_OFFSET};
pub use validator::{validate_cursor, validate_cursors};

/// Caller-supplied resume position.
///
/// Both fields are optional on the wire; missing values are reported by the
/// validator rather than rejected at deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub struct Cursor {
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
}

impl Cursor {
    /// Create a cursor with both fields present.
    #[must_use]
    pub fn new(partition: impl Into<String>, offset: impl Into<String>) -> Self {
        Self {
            partition: Some(partition.into()),
            offset: Some(offset.into()),
        }
    }

    /// Create a cursor from possibly missing fields.
    #[must_use]
    pub fn from_parts(partition: Option<String>, offset: Option<String>) -> Self {
        Self { partition, offset }
    }

    /// Cursor that starts from the oldest retained event of `partition`.
    #[must_use]
    pub fn before_oldest(partition: impl Into<String>) -> Self {
        Self::new(partition, BEFORE_OLDEST_OFFSET)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let partition = self.partition.as_deref().unwrap_or("<null>");
        let offset = self.offset.as_deref().unwrap_or("<null>");
        write!(f, "{partition}:{offset}")
    }
}
