//! Migration-specific error types

use crate::executor::DbError;

/// Migration-specific errors
#[derive(Debug)]
pub enum MigrationError {
    /// Database execution error outside a revision
    Database(DbError),
    /// Migrations directory or revision file not found
    FileNotFound(String),
    /// Invalid revision file
    InvalidFormat(String),
    /// Applied revision file edited after it was applied
    ChecksumMismatch {
        revision: String,
        stored: String,
        current: String,
    },
    /// A statement failed; the revision's transaction was rolled back
    ApplyFailed {
        revision: String,
        statement: String,
        message: String,
        last_good: Option<String>,
    },
    /// Target names no revision, or a prefix matches several
    UnknownRevision(String),
    /// The database records a revision that is not in the chain
    MissingFile(String),
    /// `head` requested while the chain has several heads
    MultipleHeads(Vec<String>),
    /// Chain structure is broken (missing parent, cycle, duplicate id)
    InvalidChain(String),
    /// Relative downgrade across a merge point
    AmbiguousDowngrade(String),
    Io(std::io::Error),
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Database(e) => write!(f, "Database error: {}", e),
            MigrationError::FileNotFound(path) => write!(f, "Migration file not found: {}", path),
            MigrationError::InvalidFormat(msg) => write!(f, "Invalid revision file: {}", msg),
            MigrationError::ChecksumMismatch {
                revision,
                stored,
                current,
            } => {
                write!(
                    f,
                    "Revision '{}' has been modified after being applied.\n\
                     Stored checksum: {}\n\
                     Current checksum: {}\n\
                     Restore the original file and put further changes in a new revision.",
                    revision, stored, current
                )
            }
            MigrationError::ApplyFailed {
                revision,
                statement,
                message,
                last_good,
            } => {
                write!(
                    f,
                    "Revision '{}' failed and was rolled back: {}\n\
                     Failing statement:\n    {}\n\
                     Database remains at revision: {}",
                    revision,
                    message,
                    statement,
                    last_good.as_deref().unwrap_or("base")
                )
            }
            MigrationError::UnknownRevision(target) => {
                write!(f, "No revision matches '{}'", target)
            }
            MigrationError::MissingFile(revision) => {
                write!(
                    f,
                    "Database is at revision '{}' but no revision file declares it.\n\
                     Suggestion: Ensure all revision files are present in the migrations directory",
                    revision
                )
            }
            MigrationError::MultipleHeads(heads) => {
                write!(
                    f,
                    "Multiple heads present: {}\n\
                     Suggestion: create a merge revision, or target 'heads' or a specific revision",
                    heads.join(", ")
                )
            }
            MigrationError::InvalidChain(msg) => write!(f, "Invalid revision chain: {}", msg),
            MigrationError::AmbiguousDowngrade(msg) => {
                write!(f, "{}\nSuggestion: downgrade to an explicit revision id", msg)
            }
            MigrationError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Database(e) => Some(e),
            MigrationError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for MigrationError {
    fn from(error: DbError) -> Self {
        MigrationError::Database(error)
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(error: std::io::Error) -> Self {
        MigrationError::Io(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_failed_names_statement_and_last_good() {
        let err = MigrationError::ApplyFailed {
            revision: "4c1d2e3f4a5b".into(),
            statement: "ALTER TABLE wine_batches ADD COLUMN broken".into(),
            message: "syntax error".into(),
            last_good: Some("3b9a8c7d6e5f".into()),
        };
        let text = err.to_string();
        assert!(text.contains("ALTER TABLE wine_batches ADD COLUMN broken"));
        assert!(text.contains("remains at revision: 3b9a8c7d6e5f"));
    }

    #[test]
    fn test_first_revision_failure_reports_base() {
        let err = MigrationError::ApplyFailed {
            revision: "1a2b3c4d5e6f".into(),
            statement: "CREATE TABLE x".into(),
            message: "boom".into(),
            last_good: None,
        };
        assert!(err.to_string().ends_with("remains at revision: base"));
    }
}
