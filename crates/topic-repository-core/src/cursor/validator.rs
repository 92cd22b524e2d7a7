//! Cursor validation against a partition snapshot.
//!
//! A cursor names the last consumed event, so a valid numeric offset `n`
//! resumes at sequence number `n + 1`. The sentinel resumes at the oldest
//! retained event.
//!
//! # Bounds
//!
//! For a partition with watermarks `(earliest, latest)`, numeric offsets in
//! `[earliest - 1, latest - 1]` are valid. Anything below has aged out of
//! retention and anything above has not been written yet.

use tracing::debug;

use crate::engine::{EngineReadPosition, PartitionWatermarks};
use crate::error::{CursorError, InvalidCursorError};

use super::codec::{parse_offset, CursorOffset};
use super::Cursor;

/// Validate a single cursor.
///
/// # Errors
///
/// Returns the first matching [`CursorError`], checked in this order:
/// missing partition, missing offset, unknown partition, malformed offset,
/// empty partition, offset out of the retained range.
pub fn validate_cursor(
    snapshot: &[PartitionWatermarks],
    cursor: &Cursor,
) -> Result<EngineReadPosition, CursorError> {
    let partition_id = cursor
        .partition
        .as_deref()
        .ok_or(CursorError::NullPartition)?;
    let raw_offset = cursor.offset.as_deref().ok_or(CursorError::NullOffset)?;

    let watermarks = snapshot
        .iter()
        .find(|p| p.partition_id() == partition_id)
        .ok_or(CursorError::PartitionNotFound)?;

    let offset = parse_offset(raw_offset)?;

    if watermarks.is_empty() && offset != CursorOffset::BeforeOldest {
        return Err(CursorError::EmptyPartition);
    }

    let sequence = match offset {
        CursorOffset::BeforeOldest => {
            return Ok(EngineReadPosition::new(
                watermarks.partition,
                watermarks.earliest,
            ));
        }
        CursorOffset::Sequence(n) => n,
    };

    if sequence < watermarks.earliest - 1 || sequence > watermarks.latest - 1 {
        return Err(CursorError::Unavailable);
    }

    Ok(EngineReadPosition::new(watermarks.partition, sequence + 1))
}

/// Validate a list of cursors, stopping at the first invalid one.
///
/// # Errors
///
/// Returns the offending cursor together with its [`CursorError`].
pub fn validate_cursors(
    snapshot: &[PartitionWatermarks],
    cursors: &[Cursor],
) -> Result<Vec<EngineReadPosition>, InvalidCursorError> {
    cursors
        .iter()
        .map(|cursor| {
            validate_cursor(snapshot, cursor).map_err(|error| {
                debug!(cursor = %cursor, error = error.as_str(), "rejected cursor");
                InvalidCursorError::new(cursor.clone(), error)
            })
        })
        .collect()
}
