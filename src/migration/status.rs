//! Migration status tracking

use std::path::PathBuf;

/// Where a database stands relative to the revision chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Heads recorded in the version table; empty at base
    pub current: Vec<String>,

    /// Applied revisions in apply order
    pub applied: Vec<String>,

    /// Revisions not yet applied, in apply order
    pub pending: Vec<PendingRevision>,

    /// Heads of the chain on disk
    pub heads: Vec<String>,
}

/// A revision not yet applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRevision {
    pub revision: String,
    pub message: String,
    pub path: Option<PathBuf>,
}

impl MigrationStatus {
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    /// Single current revision, `None` at base or when several heads are applied
    #[must_use]
    pub fn current_revision(&self) -> Option<&str> {
        match self.current.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn next_pending(&self) -> Option<&PendingRevision> {
        self.pending.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_helpers() {
        let status = MigrationStatus {
            current: vec!["3b9a8c7d6e5f".into()],
            applied: vec!["1a2b3c4d5e6f".into(), "3b9a8c7d6e5f".into()],
            pending: vec![PendingRevision {
                revision: "4c1d2e3f4a5b".into(),
                message: "add fiken sync status".into(),
                path: None,
            }],
            heads: vec!["4c1d2e3f4a5b".into()],
        };
        assert!(!status.is_up_to_date());
        assert_eq!(status.current_revision(), Some("3b9a8c7d6e5f"));
        assert_eq!(status.next_pending().unwrap().revision, "4c1d2e3f4a5b");
    }
}
