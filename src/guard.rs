//! Pre-commit guard: refuse model changes that arrive without a migration.
//!
//! The staged files are sorted into model sources, revision files and
//! dependency manifests, then run through the decision table:
//!
//! | model changed | migration changed | outcome                     |
//! |---------------|-------------------|-----------------------------|
//! | no            | no                | allow                       |
//! | yes           | no                | block with remediation      |
//! | yes           | yes               | run the harness, allow if it passes |
//! | no            | yes               | run the harness, allow if it passes |
//!
//! "Model changed" requires a staged model source. The declared tables are
//! then diffed against the replayed revision chain, and added diff lines are
//! matched against entity, column, relationship and table-name patterns;
//! either signal counts. Drift with no staged model file is left alone.

use crate::compat::{self, CompatError, CompatReport, RuleSet};
use crate::config::CellarConfig;
use crate::harness::{self, HarnessError, HarnessOptions, HarnessReport, KeepDatabase};
use crate::migration::{MigrationError, Migrator};
use crate::model::TableDef;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

const ENTITY_PATTERN: &str = r"^\s*pub\s+struct\s+(\w+)";
const COLUMN_PATTERN: &str = r#"ColumnDef::(?:new|ore|cents|one_of|generated)\(\s*"(\w+)""#;
const RELATIONSHIP_PATTERN: &str = r#"\.references\(\s*"(\w+)""#;
const TABLE_NAME_PATTERN: &str =
    r#"(?:TableDef::entity\(\s*"(\w+)"|const\s+TABLE\s*:\s*&(?:'static\s+)?str\s*=\s*"(\w+)")"#;
const HUNK_PATTERN: &str = r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,\d+)? @@";

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("guard I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("`{command}` failed: {message}")]
    Git { command: String, message: String },
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Harness(#[from] HarnessError),
    #[error(transparent)]
    Compat(#[from] CompatError),
    #[error("invalid change pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Where the set of changed files comes from
pub trait ChangeSource {
    /// Paths relative to the repository root
    fn changed_files(&self) -> Result<Vec<PathBuf>, GuardError>;

    /// Unified diff of one changed file
    fn diff(&self, path: &Path) -> Result<String, GuardError>;
}

/// Files staged in a git index
#[derive(Debug, Clone)]
pub struct GitStaged {
    repo: PathBuf,
}

impl GitStaged {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    fn git(&self, args: &[&str]) -> Result<String, GuardError> {
        let output = Command::new("git").current_dir(&self.repo).args(args).output()?;
        if !output.status.success() {
            return Err(GuardError::Git {
                command: format!("git {}", args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ChangeSource for GitStaged {
    fn changed_files(&self) -> Result<Vec<PathBuf>, GuardError> {
        let out = self.git(&["diff", "--cached", "--name-only", "--diff-filter=ACMR"])?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(PathBuf::from).collect())
    }

    fn diff(&self, path: &Path) -> Result<String, GuardError> {
        let path = path.to_string_lossy();
        self.git(&["diff", "--cached", "-U0", "--", path.as_ref()])
    }
}

/// A fixed change set, for tests and for callers that already know the diff
#[derive(Debug, Clone, Default)]
pub struct StaticChanges {
    files: Vec<(PathBuf, String)>,
}

impl StaticChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<PathBuf>, diff: &str) -> Self {
        self.files.push((path.into(), diff.to_string()));
        self
    }
}

impl ChangeSource for StaticChanges {
    fn changed_files(&self) -> Result<Vec<PathBuf>, GuardError> {
        Ok(self.files.iter().map(|(p, _)| p.clone()).collect())
    }

    fn diff(&self, path: &Path) -> Result<String, GuardError> {
        Ok(self
            .files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, d)| d.clone())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Model,
    Migration,
    Manifest,
    Other,
}

/// Staged files sorted by what they affect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub models: Vec<PathBuf>,
    pub migrations: Vec<PathBuf>,
    pub manifests: Vec<PathBuf>,
    pub other: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct GuardOptions {
    pub migrations_dir: PathBuf,
    pub model_paths: Vec<PathBuf>,
    pub manifests: Vec<PathBuf>,
    pub compat_rules: Option<PathBuf>,
    pub keep_database: KeepDatabase,
}

impl GuardOptions {
    pub fn from_config(config: &CellarConfig) -> Self {
        Self {
            migrations_dir: config.migrations_dir.clone(),
            model_paths: config.model_paths.iter().map(PathBuf::from).collect(),
            manifests: config.manifests.clone(),
            compat_rules: config.compat_rules.clone(),
            keep_database: KeepDatabase::OnFailure,
        }
    }

    pub fn classify(&self, path: &Path) -> FileKind {
        let is_rust = path.extension().map_or(false, |e| e == "rs");
        if harness::is_revision_file(path, &self.migrations_dir) {
            FileKind::Migration
        } else if is_rust && self.model_paths.iter().any(|m| path.starts_with(m)) {
            FileKind::Model
        } else if self
            .manifests
            .iter()
            .any(|m| m.file_name().is_some() && m.file_name() == path.file_name())
        {
            FileKind::Manifest
        } else {
            FileKind::Other
        }
    }

    pub fn change_set(&self, files: &[PathBuf]) -> ChangeSet {
        let mut set = ChangeSet::default();
        for file in files {
            let bucket = match self.classify(file) {
                FileKind::Model => &mut set.models,
                FileKind::Migration => &mut set.migrations,
                FileKind::Manifest => &mut set.manifests,
                FileKind::Other => &mut set.other,
            };
            bucket.push(file.clone());
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintKind {
    Entity,
    Column,
    Relationship,
    TableName,
}

impl HintKind {
    fn label(&self) -> &'static str {
        match self {
            HintKind::Entity => "entity",
            HintKind::Column => "column",
            HintKind::Relationship => "relationship to",
            HintKind::TableName => "table",
        }
    }
}

/// An added line that looks like a schema change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHint {
    pub file: PathBuf,
    pub line: Option<usize>,
    pub kind: HintKind,
    pub name: String,
}

impl fmt::Display for ModelHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.label(), self.name)?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

/// Schema-relevant additions in one file's unified diff
pub fn detect_model_changes(file: &Path, diff: &str) -> Result<Vec<ModelHint>, GuardError> {
    let patterns = [
        (HintKind::TableName, Regex::new(TABLE_NAME_PATTERN)?),
        (HintKind::Entity, Regex::new(ENTITY_PATTERN)?),
        (HintKind::Column, Regex::new(COLUMN_PATTERN)?),
        (HintKind::Relationship, Regex::new(RELATIONSHIP_PATTERN)?),
    ];
    let hunk = Regex::new(HUNK_PATTERN)?;

    let mut hints = Vec::new();
    let mut next_line: Option<usize> = None;
    for raw in diff.lines() {
        if let Some(caps) = hunk.captures(raw) {
            next_line = caps[1].parse().ok();
            continue;
        }
        if raw.starts_with("+++") || raw.starts_with("---") {
            continue;
        }
        let Some(added) = raw.strip_prefix('+') else {
            if !raw.starts_with('-') {
                next_line = next_line.map(|n| n + 1);
            }
            continue;
        };
        let trimmed = added.trim_start();
        if !trimmed.starts_with("//") {
            for (kind, regex) in &patterns {
                for caps in regex.captures_iter(added) {
                    if let Some(name) = caps.iter().skip(1).flatten().next() {
                        hints.push(ModelHint {
                            file: file.to_path_buf(),
                            line: next_line,
                            kind: *kind,
                            name: name.as_str().to_string(),
                        });
                    }
                }
            }
        }
        next_line = next_line.map(|n| n + 1);
    }
    Ok(hints)
}

/// What the decision table asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Block,
    RunHarness,
}

/// A model change needs a staged model file plus either structural drift or
/// a schema-relevant added line. The compiled-in model can lag behind the
/// staged source, so the patterns still count when the chain replays cleanly.
pub fn model_changed(changes: &ChangeSet, hints: &[ModelHint], drift: Option<&[String]>) -> bool {
    !changes.models.is_empty() && (drift.map_or(false, |d| !d.is_empty()) || !hints.is_empty())
}

pub fn decide(model_changed: bool, migration_changed: bool) -> Action {
    match (model_changed, migration_changed) {
        (false, false) => Action::Allow,
        (true, false) => Action::Block,
        (_, true) => Action::RunHarness,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    /// Model changed without a migration
    MissingMigration,
    HarnessFailed,
    BlockedDependency,
}

impl Outcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Allowed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Allowed => write!(f, "allowed"),
            Outcome::MissingMigration => write!(f, "blocked: model changed without a migration"),
            Outcome::HarnessFailed => write!(f, "blocked: migration test harness failed"),
            Outcome::BlockedDependency => write!(f, "blocked: incompatible dependency"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardReport {
    pub outcome: Outcome,
    pub changes: ChangeSet,
    pub hints: Vec<ModelHint>,
    /// Structural drift between the model and the migrated schema, when known
    pub drift: Option<Vec<String>>,
    pub harness: Option<HarnessReport>,
    /// Findings in the staged manifests
    pub dependencies: Option<CompatReport>,
    /// Scan of every configured manifest; never blocks
    pub advisory: CompatReport,
    /// Next steps printed when the commit is blocked
    pub remediation: Option<String>,
}

pub struct Guard<'a> {
    options: GuardOptions,
    tables: &'a [TableDef],
    rules: RuleSet,
}

impl<'a> Guard<'a> {
    pub fn new(options: GuardOptions, tables: &'a [TableDef]) -> Result<Self, GuardError> {
        let rules = RuleSet::load(options.compat_rules.as_deref())?;
        Ok(Self {
            options,
            tables,
            rules,
        })
    }

    pub fn options(&self) -> &GuardOptions {
        &self.options
    }

    pub fn run(&self, source: &dyn ChangeSource) -> Result<GuardReport, GuardError> {
        let files = source.changed_files()?;
        let changes = self.options.change_set(&files);
        log::debug!(
            "{} model, {} migration, {} manifest file(s) staged",
            changes.models.len(),
            changes.migrations.len(),
            changes.manifests.len()
        );

        let mut hints = Vec::new();
        for file in &changes.models {
            hints.extend(detect_model_changes(file, &source.diff(file)?)?);
        }
        let drift = self.structural_drift();
        let schema_changed = model_changed(&changes, &hints, drift.as_deref());

        let mut report = GuardReport {
            outcome: Outcome::Allowed,
            changes,
            hints,
            drift,
            harness: None,
            dependencies: None,
            advisory: CompatReport::default(),
            remediation: None,
        };

        match decide(schema_changed, !report.changes.migrations.is_empty()) {
            Action::Allow => log::info!("No schema-relevant changes staged"),
            Action::Block => {
                report.outcome = Outcome::MissingMigration;
                report.remediation = Some(self.remediation(&report));
                return Ok(report);
            }
            Action::RunHarness => {
                log::info!("Migration changes staged; running the migration test harness");
                let result = harness::run(&HarnessOptions {
                    migrations_dir: self.options.migrations_dir.clone(),
                    keep_database: self.options.keep_database,
                })?;
                let passed = result.passed();
                if !passed {
                    report.outcome = Outcome::HarnessFailed;
                    report.remediation = Some(harness_remediation(&result));
                }
                report.harness = Some(result);
                if !passed {
                    return Ok(report);
                }
            }
        }

        if !report.changes.manifests.is_empty() {
            let staged = compat::scan(&report.changes.manifests, &self.rules)?;
            if !staged.passed() {
                report.outcome = Outcome::BlockedDependency;
                report.remediation = Some(dependency_remediation(&staged));
            }
            report.dependencies = Some(staged);
            if !report.outcome.is_allowed() {
                return Ok(report);
            }
        }

        report.advisory = compat::scan(&self.options.manifests, &self.rules)?;
        for finding in report.advisory.warnings() {
            log::warn!("{}", finding);
        }
        Ok(report)
    }

    /// `None` when the chain cannot be replayed
    fn structural_drift(&self) -> Option<Vec<String>> {
        let checked = Migrator::new(&self.options.migrations_dir).and_then(|m| m.check(self.tables));
        match checked {
            Ok(changes) => Some(changes.iter().map(|c| c.to_string()).collect()),
            Err(e) => {
                log::warn!("Structural model check unavailable ({}); using change patterns", e);
                None
            }
        }
    }

    fn remediation(&self, report: &GuardReport) -> String {
        let mut out = String::from("Model changes detected without a migration:\n");
        for file in &report.changes.models {
            out.push_str(&format!("    {}\n", file.display()));
            for hint in report.hints.iter().filter(|h| &h.file == file) {
                out.push_str(&format!("        + {}\n", hint));
            }
        }
        if let Some(drift) = &report.drift {
            if !drift.is_empty() {
                out.push_str("Schema differences not covered by any revision:\n");
                for change in drift {
                    out.push_str(&format!("    {}\n", change));
                }
            }
        }
        let message = suggested_message(report);
        out.push_str("Generate a migration with:\n");
        out.push_str(&format!(
            "    cellarguard-migrate revision --autogenerate -m \"{}\"\n",
            message
        ));
        out.push_str(&format!(
            "Review the new file in {}, run `cellarguard-migrate test`, then stage it and commit again.",
            self.options.migrations_dir.display()
        ));
        out
    }
}

fn suggested_message(report: &GuardReport) -> String {
    if let Some(first) = report.drift.as_ref().and_then(|d| d.first()) {
        return first.clone();
    }
    match report.hints.first() {
        Some(hint) => format!("add {} {}", hint.kind.label(), hint.name),
        None => "describe the model change".to_string(),
    }
}

fn harness_remediation(result: &HarnessReport) -> String {
    let mut out = String::from("Migration test harness failed:\n");
    for failure in &result.failures {
        out.push_str(&format!("    {}\n", failure));
    }
    if let Some(db) = &result.kept_database {
        out.push_str(&format!("Inspect the database left at {}\n", db.display()));
    }
    out.push_str("Fix the revision and rerun `cellarguard-migrate test`.");
    out
}

fn dependency_remediation(report: &CompatReport) -> String {
    let mut out = String::from("Dependencies incompatible with the serverless runtime:\n");
    for finding in report.blocked() {
        out.push_str(&format!("    {}\n", finding));
    }
    for finding in report.blocked() {
        if let Some(replacement) = &finding.suggested_replacement {
            out.push_str(&format!("Replace {} with {}.\n", finding.package, replacement));
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIKEN_DIFF: &str = "\
diff --git a/src/model/catalog.rs b/src/model/catalog.rs
--- a/src/model/catalog.rs
+++ b/src/model/catalog.rs
@@ -132,0 +133,3 @@ pub fn wine_batches_table() -> TableDef {
+            ColumnDef::new(\"fiken_sync_status\", ColumnType::Varchar(20))
+                .not_null()
+                .default(\"'pending'\"),
";

    fn options() -> GuardOptions {
        GuardOptions {
            migrations_dir: PathBuf::from("migrations"),
            model_paths: vec![PathBuf::from("src/model/")],
            manifests: vec![PathBuf::from("requirements.txt"), PathBuf::from("Cargo.toml")],
            compat_rules: None,
            keep_database: KeepDatabase::Never,
        }
    }

    #[test]
    fn test_decision_table() {
        assert_eq!(decide(false, false), Action::Allow);
        assert_eq!(decide(true, false), Action::Block);
        assert_eq!(decide(true, true), Action::RunHarness);
        assert_eq!(decide(false, true), Action::RunHarness);
    }

    #[test]
    fn test_model_changed_requires_a_staged_model_file() {
        let drift = vec!["add column wine_batches.fiken_sync_status".to_string()];
        let hints = detect_model_changes(Path::new("src/model/catalog.rs"), FIKEN_DIFF).unwrap();
        let readme_only = options().change_set(&[PathBuf::from("README.md")]);
        let model_staged = options().change_set(&[PathBuf::from("src/model/catalog.rs")]);

        assert!(!model_changed(&readme_only, &[], Some(drift.as_slice())));
        assert!(model_changed(&model_staged, &[], Some(drift.as_slice())));
        assert!(model_changed(&model_staged, &hints, Some(&[][..])));
        assert!(model_changed(&model_staged, &hints, None));
        assert!(!model_changed(&model_staged, &[], Some(&[][..])));
    }

    #[test]
    fn test_classify_files() {
        let set = options().change_set(&[
            PathBuf::from("src/model/catalog.rs"),
            PathBuf::from("migrations/3b9a8c7d6e5f_add_sync.sql"),
            PathBuf::from("lambda/requirements.txt"),
            PathBuf::from("README.md"),
        ]);
        assert_eq!(set.models, vec![PathBuf::from("src/model/catalog.rs")]);
        assert_eq!(set.migrations.len(), 1);
        assert_eq!(set.manifests, vec![PathBuf::from("lambda/requirements.txt")]);
        assert_eq!(set.other, vec![PathBuf::from("README.md")]);
    }

    #[test]
    fn test_detects_new_column_with_line() {
        let hints = detect_model_changes(Path::new("src/model/catalog.rs"), FIKEN_DIFF).unwrap();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].kind, HintKind::Column);
        assert_eq!(hints[0].name, "fiken_sync_status");
        assert_eq!(hints[0].line, Some(133));
    }

    #[test]
    fn test_detects_entity_table_and_relationship() {
        let diff = "\
@@ -0,0 +1,6 @@
+pub struct WineAward {
+    pub id: Uuid,
+}
+    TableDef::entity(\"wine_awards\", \"Awards\", vec![
+        ColumnDef::new(\"wine_id\", ColumnType::Uuid).references(\"wines\", OnDelete::Cascade),
+    ])
";
        let hints = detect_model_changes(Path::new("src/model/awards.rs"), diff).unwrap();
        let kinds: Vec<HintKind> = hints.iter().map(|h| h.kind).collect();
        assert!(kinds.contains(&HintKind::Entity));
        assert!(kinds.contains(&HintKind::TableName));
        assert!(kinds.contains(&HintKind::Column));
        assert!(kinds.contains(&HintKind::Relationship));
    }

    #[test]
    fn test_comment_and_removed_lines_are_ignored() {
        let diff = "\
@@ -10,1 +10,1 @@
-            ColumnDef::new(\"old_name\", ColumnType::Text),
+            // ColumnDef::new(\"old_name\", ColumnType::Text),
";
        let hints = detect_model_changes(Path::new("src/model/catalog.rs"), diff).unwrap();
        assert!(hints.is_empty());
    }

    #[test]
    fn test_unrelated_changes_are_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options();
        opts.migrations_dir = dir.path().join("missing");
        opts.manifests = vec![];
        let guard = Guard::new(opts, &[]).unwrap();
        let report = guard
            .run(&StaticChanges::new().with("README.md", "+hello\n"))
            .unwrap();
        assert_eq!(report.outcome, Outcome::Allowed);
        assert!(report.remediation.is_none());
    }

    #[test]
    fn test_pattern_fallback_blocks_new_column() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options();
        // no chain to replay, so detection falls back to patterns
        opts.migrations_dir = dir.path().join("missing");
        let guard = Guard::new(opts, &[]).unwrap();
        let report = guard
            .run(&StaticChanges::new().with("src/model/catalog.rs", FIKEN_DIFF))
            .unwrap();
        assert_eq!(report.outcome, Outcome::MissingMigration);
        assert!(report.drift.is_none());
        let message = report.remediation.unwrap();
        assert!(message.contains("src/model/catalog.rs"));
        assert!(message.contains("column fiken_sync_status"));
        assert!(message.contains("revision --autogenerate"));
    }

    #[test]
    fn test_staged_blocked_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let requirements = dir.path().join("requirements.txt");
        std::fs::write(&requirements, "fastapi==0.110.0\npsycopg2==2.9.9\n").unwrap();
        let mut opts = options();
        opts.migrations_dir = dir.path().join("missing");
        opts.manifests = vec![requirements.clone()];
        let guard = Guard::new(opts, &[]).unwrap();
        let report = guard
            .run(&StaticChanges::new().with(requirements, "+psycopg2==2.9.9\n"))
            .unwrap();
        assert_eq!(report.outcome, Outcome::BlockedDependency);
        assert!(report.remediation.unwrap().contains("Replace psycopg2 with psycopg2-binary"));
    }
}
