//! Revision-based schema migrations
//!
//! Revisions are SQL files in a migrations directory, linked through their
//! `down_revision` header into a chain (a DAG once branches and merges
//! appear). The [`Migrator`] applies and reverts them one transaction per
//! revision, recording the current heads in `cellar_version` and every run in
//! `cellar_revision_log`.
//!
//! # Example
//!
//! ```rust,no_run
//! use cellarguard::migration::Migrator;
//! use cellarguard::SqliteExecutor;
//!
//! let migrator = Migrator::new("migrations")?;
//! let db = SqliteExecutor::open("local.db")?;
//! let applied = migrator.upgrade(&db, "head")?;
//! println!("applied {} revision(s)", applied.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod chain;
pub mod checksum;
pub mod error;
pub mod migrator;
pub mod ordering;
pub mod record;
pub mod revision;
pub mod schema;
pub mod splitter;
pub mod state_table;
pub mod status;

pub use chain::RevisionChain;
pub use error::MigrationError;
pub use migrator::Migrator;
pub use record::RevisionRecord;
pub use revision::{Direction, Revision, Section};
pub use schema::{diff, render_changes, RenderedChanges, SchemaChange, SchemaShape};
pub use status::{MigrationStatus, PendingRevision};
