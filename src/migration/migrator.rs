//! Migrator - revision generation and execution

use super::chain::RevisionChain;
use super::record::RevisionRecord;
use super::revision::{statements_body, Direction, Revision, Section};
use super::schema::{diff, render_changes, SchemaChange, SchemaShape};
use super::state_table::{
    applied_checksum, current_heads, initialize_state_tables, log_revision, read_log, write_heads,
};
use super::status::{MigrationStatus, PendingRevision};
use super::MigrationError;
use crate::executor::{with_transaction, CellarExecutor, Dialect};
use crate::model::TableDef;
use crate::sqlite::SqliteExecutor;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Revision engine over one migrations directory
///
/// Every revision runs in its own transaction together with the version
/// table update and its log entry, so the recorded revision always matches
/// the schema: a failed revision leaves the previous revision recorded.
#[derive(Debug, Clone)]
pub struct Migrator {
    migrations_dir: PathBuf,
    chain: RevisionChain,
    statement_timeout: Option<Duration>,
}

impl Migrator {
    /// Load the chain from `migrations_dir`
    pub fn new(migrations_dir: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let migrations_dir = migrations_dir.as_ref().to_path_buf();
        let chain = RevisionChain::load(&migrations_dir)?;
        Ok(Self::from_chain(migrations_dir, chain))
    }

    pub fn from_chain(migrations_dir: impl AsRef<Path>, chain: RevisionChain) -> Self {
        Self {
            migrations_dir: migrations_dir.as_ref().to_path_buf(),
            chain,
            statement_timeout: None,
        }
    }

    /// Bound every statement on Postgres (`SET statement_timeout`)
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn chain(&self) -> &RevisionChain {
        &self.chain
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Heads recorded in the database; empty at base
    pub fn current(&self, executor: &dyn CellarExecutor) -> Result<Vec<String>, MigrationError> {
        initialize_state_tables(executor)?;
        Ok(current_heads(executor)?)
    }

    pub fn status(&self, executor: &dyn CellarExecutor) -> Result<MigrationStatus, MigrationError> {
        let current = self.current(executor)?;
        let applied = self.chain.applied_set(&current)?;
        let applied_order = self
            .chain
            .in_order(&applied)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();
        let pending = self
            .chain
            .revisions()
            .iter()
            .filter(|r| !applied.contains(&r.id))
            .map(|r| PendingRevision {
                revision: r.id.clone(),
                message: r.message.clone(),
                path: r.path.clone(),
            })
            .collect();
        Ok(MigrationStatus {
            current,
            applied: applied_order,
            pending,
            heads: self.chain.heads().iter().map(|r| r.id.clone()).collect(),
        })
    }

    /// Newest first
    pub fn history(&self) -> Vec<&Revision> {
        self.chain.revisions().iter().rev().collect()
    }

    /// Applied and reverted revisions as logged in the database
    pub fn applied_log(&self, executor: &dyn CellarExecutor) -> Result<Vec<RevisionRecord>, MigrationError> {
        initialize_state_tables(executor)?;
        read_log(executor)
    }

    /// Apply revisions up to `target`.
    ///
    /// `target` is `head`, `heads`, `+N`, a revision id, a unique prefix or a
    /// branch label. Returns the applied revision ids in order.
    pub fn upgrade(&self, executor: &dyn CellarExecutor, target: &str) -> Result<Vec<String>, MigrationError> {
        self.prepare(executor)?;
        let mut applied = self.chain.applied_set(&current_heads(executor)?)?;
        self.validate_checksums(executor, &applied)?;

        let wanted: BTreeSet<String> = match target {
            "head" => match self.chain.head()? {
                Some(head) => self.chain.ancestors(&head.id),
                None => BTreeSet::new(),
            },
            "heads" => self
                .chain
                .heads()
                .iter()
                .flat_map(|h| self.chain.ancestors(&h.id))
                .collect(),
            relative if relative.starts_with('+') => {
                let steps = parse_steps(relative)?;
                self.chain
                    .revisions()
                    .iter()
                    .filter(|r| !applied.contains(&r.id))
                    .take(steps)
                    .flat_map(|r| self.chain.ancestors(&r.id))
                    .collect()
            }
            spec => self.chain.ancestors(&self.chain.resolve(spec)?.id),
        };

        let to_apply: Vec<&Revision> = self
            .chain
            .revisions()
            .iter()
            .filter(|r| wanted.contains(&r.id) && !applied.contains(&r.id))
            .collect();
        if to_apply.is_empty() {
            log::info!("Database is already at {}", target);
            return Ok(Vec::new());
        }

        let mut done = Vec::with_capacity(to_apply.len());
        for revision in to_apply {
            applied = self.run(executor, revision, Direction::Upgrade, applied)?;
            done.push(revision.id.clone());
        }
        Ok(done)
    }

    /// Revert revisions down to `target` (`base`, `-N`, a revision id or prefix).
    ///
    /// Returns the reverted revision ids, newest first.
    pub fn downgrade(&self, executor: &dyn CellarExecutor, target: &str) -> Result<Vec<String>, MigrationError> {
        self.prepare(executor)?;
        let heads = current_heads(executor)?;
        let mut applied = self.chain.applied_set(&heads)?;
        self.validate_checksums(executor, &applied)?;

        let keep: BTreeSet<String> = match target {
            "base" => BTreeSet::new(),
            relative if relative.starts_with('-') => {
                let steps = parse_steps(relative)?;
                self.step_back(&heads, steps)?
            }
            spec => {
                let revision = self.chain.resolve(spec)?;
                if !applied.contains(&revision.id) {
                    return Err(MigrationError::UnknownRevision(format!(
                        "{} (not applied; use upgrade)",
                        spec
                    )));
                }
                self.chain.ancestors(&revision.id)
            }
        };

        let to_revert: Vec<&Revision> = self
            .chain
            .in_order(&applied)
            .into_iter()
            .rev()
            .filter(|r| !keep.contains(&r.id))
            .collect();
        if to_revert.is_empty() {
            log::info!("Nothing to downgrade");
            return Ok(Vec::new());
        }

        let mut done = Vec::with_capacity(to_revert.len());
        for revision in to_revert {
            applied = self.run(executor, revision, Direction::Downgrade, applied)?;
            done.push(revision.id.clone());
        }
        Ok(done)
    }

    /// Schema produced by the whole chain, replayed into an in-memory SQLite
    pub fn migrated_shape(&self) -> Result<SchemaShape, MigrationError> {
        let scratch = SqliteExecutor::open_in_memory()?;
        self.upgrade(&scratch, "heads")?;
        Ok(SchemaShape::introspect(&scratch)?)
    }

    /// Differences between the declared `tables` and the migrated schema
    pub fn check(&self, tables: &[TableDef]) -> Result<Vec<SchemaChange>, MigrationError> {
        Ok(diff(&self.migrated_shape()?, tables))
    }

    /// Write a new revision on top of the current head.
    ///
    /// With `autogenerate`, the body is rendered for both dialects from the
    /// drift between `tables` and the migrated schema; `None` is returned
    /// when there is nothing to migrate. Without it, an empty revision is
    /// written for hand-written statements; with several heads it becomes a
    /// merge revision.
    pub fn generate(
        &self,
        message: &str,
        autogenerate: bool,
        tables: &[TableDef],
    ) -> Result<Option<Revision>, MigrationError> {
        let parents: Vec<String> = if autogenerate {
            self.chain.head()?.map(|h| h.id.clone()).into_iter().collect()
        } else {
            self.chain.heads().iter().map(|h| h.id.clone()).collect()
        };
        let mut revision = Revision::new(message, parents);

        if autogenerate {
            let changes = self.check(tables)?;
            if changes.is_empty() {
                log::info!("No changes in schema detected");
                return Ok(None);
            }
            let mut downgrades = Vec::new();
            for dialect in Dialect::all() {
                let rendered = render_changes(&changes, dialect);
                for warning in &rendered.warnings {
                    log::warn!("{}: {}", dialect, warning);
                }
                let mut upgrade = String::new();
                for change in &changes {
                    upgrade.push_str(&format!("-- {}\n", change));
                }
                for warning in &rendered.warnings {
                    upgrade.push_str(&format!("-- WARNING: {}\n", warning));
                }
                upgrade.push_str(&statements_body(&rendered.upgrade));
                revision.sections.push(Section {
                    direction: Direction::Upgrade,
                    dialect: Some(dialect),
                    body: upgrade,
                });
                downgrades.push(Section {
                    direction: Direction::Downgrade,
                    dialect: Some(dialect),
                    body: statements_body(&rendered.downgrade),
                });
            }
            revision.sections.extend(downgrades);
        } else {
            if revision.is_merge() {
                log::info!("Creating merge revision of {}", revision.down_revisions.join(", "));
            }
            revision.sections.push(Section {
                direction: Direction::Upgrade,
                dialect: None,
                body: "-- statements applied on upgrade\n".to_string(),
            });
            revision.sections.push(Section {
                direction: Direction::Downgrade,
                dialect: None,
                body: "-- statements reverting the upgrade\n".to_string(),
            });
        }

        let path = revision.write(&self.migrations_dir)?;
        log::info!("Generated revision {} at {}", revision.id, path.display());
        Ok(Some(revision))
    }

    fn prepare(&self, executor: &dyn CellarExecutor) -> Result<(), MigrationError> {
        if let (Dialect::Postgres, Some(timeout)) = (executor.dialect(), self.statement_timeout) {
            executor.execute(&format!("SET statement_timeout = {}", timeout.as_millis()))?;
        }
        initialize_state_tables(executor)?;
        Ok(())
    }

    /// An applied revision whose file changed since it ran cannot be trusted
    fn validate_checksums(
        &self,
        executor: &dyn CellarExecutor,
        applied: &BTreeSet<String>,
    ) -> Result<(), MigrationError> {
        for revision in self.chain.in_order(applied) {
            if let Some(stored) = applied_checksum(executor, &revision.id)? {
                if stored != revision.checksum {
                    return Err(MigrationError::ChecksumMismatch {
                        revision: revision.id.clone(),
                        stored,
                        current: revision.checksum.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Applied set after walking `steps` parents back from the single head
    fn step_back(&self, heads: &[String], steps: usize) -> Result<BTreeSet<String>, MigrationError> {
        let mut position = match heads {
            [] => return Ok(BTreeSet::new()),
            [only] => Some(only.clone()),
            many => {
                return Err(MigrationError::AmbiguousDowngrade(format!(
                    "Relative downgrade with several current heads ({})",
                    many.join(", ")
                )))
            }
        };
        for _ in 0..steps {
            let Some(id) = position else { break };
            let revision = self
                .chain
                .get(&id)
                .ok_or_else(|| MigrationError::MissingFile(id.clone()))?;
            position = match revision.down_revisions.as_slice() {
                [] => None,
                [parent] => Some(parent.clone()),
                _ => {
                    return Err(MigrationError::AmbiguousDowngrade(format!(
                        "Cannot step back across merge revision {}",
                        revision.id
                    )))
                }
            };
        }
        Ok(position
            .map(|id| self.chain.ancestors(&id))
            .unwrap_or_default())
    }

    /// Run one revision in a transaction and return the new applied set
    fn run(
        &self,
        executor: &dyn CellarExecutor,
        revision: &Revision,
        direction: Direction,
        applied: BTreeSet<String>,
    ) -> Result<BTreeSet<String>, MigrationError> {
        let statements = revision.statements(direction, executor.dialect());
        let previous_heads = self.chain.heads_of(&applied);
        let last_good = if previous_heads.is_empty() {
            None
        } else {
            Some(previous_heads.join(", "))
        };

        let mut next = applied;
        match direction {
            Direction::Upgrade => next.insert(revision.id.clone()),
            Direction::Downgrade => next.remove(&revision.id),
        };
        let next_heads = self.chain.heads_of(&next);

        log::info!(
            "Running {} {} ({}), {} statement(s)",
            direction,
            revision.id,
            revision.message,
            statements.len()
        );
        let start = Instant::now();

        with_transaction(executor, |tx| {
            for statement in &statements {
                log::debug!("{}", statement);
                tx.execute(statement).map_err(|e| MigrationError::ApplyFailed {
                    revision: revision.id.clone(),
                    statement: statement.clone(),
                    message: e.to_string(),
                    last_good: last_good.clone(),
                })?;
            }
            write_heads(tx, &next_heads)?;
            log_revision(
                tx,
                &revision.id,
                direction,
                &revision.checksum,
                i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX),
            )?;
            Ok(())
        })?;

        log::info!(
            "{} {} done in {} ms",
            direction,
            revision.id,
            start.elapsed().as_millis()
        );
        Ok(next)
    }
}

fn parse_steps(relative: &str) -> Result<usize, MigrationError> {
    relative[1..]
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| MigrationError::UnknownRevision(relative.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, ColumnType};
    use std::fs;

    fn write(dir: &Path, id: &str, parent: Option<&str>, minute: u32, up: &str, down: &str) {
        let content = format!(
            "-- revision: {id}\n-- down_revision: {}\n-- branch_labels: None\n-- depends_on: None\n\
             -- message: step {minute}\n-- created: 2024-01-01 00:{minute:02}:00\n\n\
             -- +upgrade\n{up}\n\n-- +downgrade\n{down}\n",
            parent.unwrap_or("None")
        );
        fs::write(dir.join(format!("{id}_step_{minute}.sql")), content).unwrap();
    }

    fn sample_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "aaaaaaaaaaaa",
            None,
            1,
            "CREATE TABLE suppliers (id UUID NOT NULL PRIMARY KEY, name VARCHAR(200) NOT NULL);",
            "DROP TABLE suppliers;",
        );
        write(
            dir.path(),
            "bbbbbbbbbbbb",
            Some("aaaaaaaaaaaa"),
            2,
            "ALTER TABLE suppliers ADD COLUMN country VARCHAR(100);",
            "ALTER TABLE suppliers DROP COLUMN country;",
        );
        dir
    }

    #[test]
    fn test_upgrade_downgrade_relative() {
        let dir = sample_dir();
        let migrator = Migrator::new(dir.path()).unwrap();
        let db = SqliteExecutor::open_in_memory().unwrap();

        assert_eq!(migrator.upgrade(&db, "+1").unwrap(), vec!["aaaaaaaaaaaa"]);
        assert_eq!(migrator.current(&db).unwrap(), vec!["aaaaaaaaaaaa"]);
        assert_eq!(migrator.upgrade(&db, "head").unwrap(), vec!["bbbbbbbbbbbb"]);
        assert!(migrator.upgrade(&db, "head").unwrap().is_empty());
        assert!(migrator.status(&db).unwrap().is_up_to_date());

        assert_eq!(migrator.downgrade(&db, "-1").unwrap(), vec!["bbbbbbbbbbbb"]);
        assert_eq!(db.list_columns("suppliers").unwrap(), vec!["id", "name"]);
        assert_eq!(migrator.downgrade(&db, "base").unwrap(), vec!["aaaaaaaaaaaa"]);
        assert!(migrator.current(&db).unwrap().is_empty());
        assert_eq!(migrator.applied_log(&db).unwrap().len(), 4);
    }

    #[test]
    fn test_edited_revision_is_refused() {
        let dir = sample_dir();
        let db = SqliteExecutor::open_in_memory().unwrap();
        Migrator::new(dir.path()).unwrap().upgrade(&db, "head").unwrap();

        write(
            dir.path(),
            "aaaaaaaaaaaa",
            None,
            1,
            "CREATE TABLE suppliers (id UUID NOT NULL PRIMARY KEY);",
            "DROP TABLE suppliers;",
        );
        let err = Migrator::new(dir.path()).unwrap().downgrade(&db, "base").unwrap_err();
        assert!(matches!(err, MigrationError::ChecksumMismatch { revision, .. } if revision == "aaaaaaaaaaaa"));
    }

    #[test]
    fn test_generate_autogenerate_and_empty() {
        let dir = sample_dir();
        let migrator = Migrator::new(dir.path()).unwrap();
        let declared = vec![TableDef {
            name: "suppliers".into(),
            comment: None,
            columns: vec![
                ColumnDef::new("id", ColumnType::Uuid).not_null(),
                ColumnDef::new("name", ColumnType::Varchar(200)).not_null(),
                ColumnDef::new("country", ColumnType::Varchar(100)),
                ColumnDef::new("tax_id", ColumnType::Varchar(50)),
            ],
            indexes: Vec::new(),
        }];

        let revision = migrator
            .generate("add supplier tax id", true, &declared)
            .unwrap()
            .unwrap();
        assert_eq!(revision.down_revisions, vec!["bbbbbbbbbbbb"]);
        assert_eq!(
            revision.statements(Direction::Upgrade, Dialect::Sqlite),
            vec!["ALTER TABLE suppliers ADD COLUMN tax_id VARCHAR(50)"]
        );

        let migrator = Migrator::new(dir.path()).unwrap();
        assert!(migrator.check(&declared).unwrap().is_empty());
        assert!(migrator.generate("nothing", true, &declared).unwrap().is_none());

        let empty = migrator.generate("backfill", false, &declared).unwrap().unwrap();
        assert!(empty.statements(Direction::Upgrade, Dialect::Postgres).is_empty());
        assert_eq!(Migrator::new(dir.path()).unwrap().chain().revisions().len(), 4);
    }
}
