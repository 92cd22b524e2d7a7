//! Cursor offset codec.
//!
//! Offsets travel as strings: a non-negative decimal sequence number, or the
//! literal [`BEFORE_OLDEST_OFFSET`] meaning "before the oldest retained event".

use std::fmt;
use std::str::FromStr;

use crate::error::CursorError;

/// Sentinel offset: consume from the oldest retained event.
pub const BEFORE_OLDEST_OFFSET: &str = "BEGIN";

/// Parsed cursor offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorOffset {
    /// Before the oldest retained event.
    BeforeOldest,
    /// Last consumed sequence number.
    Sequence(i64),
}

impl CursorOffset {
    /// Sequence number, if this is not the sentinel.
    #[must_use]
    pub fn sequence(&self) -> Option<i64> {
        match self {
            Self::BeforeOldest => None,
            Self::Sequence(n) => Some(*n),
        }
    }
}

/// Returns true if `raw` is exactly the sentinel token.
#[must_use]
pub fn is_sentinel(raw: &str) -> bool {
    raw == BEFORE_OLDEST_OFFSET
}

/// Parse a cursor offset string.
///
/// # Errors
///
/// Returns [`CursorError::InvalidFormat`] unless `raw` is the sentinel or a
/// non-empty run of ASCII digits that fits in an `i64`.
pub fn parse_offset(raw: &str) -> Result<CursorOffset, CursorError> {
    if is_sentinel(raw) {
        return Ok(CursorOffset::BeforeOldest);
    }
    // `i64::from_str` also takes a leading '+' or '-'
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CursorError::InvalidFormat);
    }
    raw.parse::<i64>()
        .map(CursorOffset::Sequence)
        .map_err(|_| CursorError::InvalidFormat)
}

impl FromStr for CursorOffset {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_offset(s)
    }
}

impl fmt::Display for CursorOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeOldest => f.write_str(BEFORE_OLDEST_OFFSET),
            Self::Sequence(n) => write!(f, "{n}"),
        }
    }
}
