//! `RevisionRecord` - entries in the `cellar_revision_log` table

use super::revision::Direction;
use super::MigrationError;
use crate::executor::Row;
use chrono::{DateTime, NaiveDateTime, Utc};

/// One applied or reverted revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    pub revision: String,
    pub direction: Direction,
    /// `SHA-256` checksum of the revision file at the time it ran
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    /// Execution time in milliseconds (`None` if not recorded)
    pub execution_time_ms: Option<i64>,
}

impl RevisionRecord {
    /// Build a record from a log row
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidFormat` when the direction or timestamp
    /// cannot be parsed.
    pub fn from_row(row: &Row) -> Result<Self, MigrationError> {
        let revision = row.get_string("revision")?;
        let direction = match row.get_string("direction")?.as_str() {
            "upgrade" => Direction::Upgrade,
            "downgrade" => Direction::Downgrade,
            other => {
                return Err(MigrationError::InvalidFormat(format!(
                    "unknown direction '{other}' in revision log"
                )))
            }
        };
        let checksum = row.get_string("checksum")?;
        let applied_at = parse_timestamp(&row.get_string("applied_at")?)?;
        let execution_time_ms = row.get("execution_time_ms").and_then(|v| v.as_i64());

        Ok(Self {
            revision,
            direction,
            checksum,
            applied_at,
            execution_time_ms,
        })
    }
}

/// Timestamps come back as RFC 3339 text from SQLite and in the server's
/// text format from Postgres
fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, MigrationError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Ok(ts.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(MigrationError::InvalidFormat(format!(
        "Failed to parse timestamp '{text}': unrecognized format"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = "2024-03-04T10:15:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(parse_timestamp("2024-03-04T10:15:00+00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-04 11:15:00+01").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-04 10:15:00").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
