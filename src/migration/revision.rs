//! Revision file parsing and rendering
//!
//! A revision is a `.sql` file named `{revision}_{slug}.sql`:
//!
//! ```text
//! -- revision: 4c1d2e3f4a5b
//! -- down_revision: 3b9a8c7d6e5f
//! -- branch_labels: None
//! -- depends_on: None
//! -- message: add fiken sync status to wine batches
//! -- created: 2024-03-04 10:15:00
//!
//! -- +upgrade
//! ALTER TABLE wine_batches ADD COLUMN fiken_sync_status VARCHAR(20) NOT NULL DEFAULT 'pending';
//!
//! -- +downgrade
//! ALTER TABLE wine_batches DROP COLUMN fiken_sync_status;
//! ```
//!
//! `-- +upgrade sqlite` / `-- +upgrade postgres` sections override the
//! generic section for that dialect. `down_revision` lists several parents
//! (comma separated) for a merge revision.

use super::checksum::calculate_checksum;
use super::splitter::split_statements;
use super::MigrationError;
use crate::executor::Dialect;
use chrono::{NaiveDateTime, Utc};
use regex::Regex;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

const FILENAME_PATTERN: &str = r"^([0-9a-f]{12})_([A-Za-z0-9_]+)\.sql$";
const HEADER_PATTERN: &str = r"^--\s*([a-z_]+):\s*(.*?)\s*$";
const MARKER_PATTERN: &str = r"^-- \+(upgrade|downgrade)(?:\s+(sqlite|postgres))?\s*$";

const CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upgrade => "upgrade",
            Direction::Downgrade => "downgrade",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `-- +upgrade` / `-- +downgrade` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub direction: Direction,
    /// `None` applies to every dialect without its own section
    pub dialect: Option<Dialect>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: String,
    pub down_revisions: Vec<String>,
    pub branch_labels: Vec<String>,
    pub depends_on: Vec<String>,
    pub message: String,
    pub created: Option<NaiveDateTime>,
    pub sections: Vec<Section>,
    pub path: Option<PathBuf>,
    pub checksum: String,
}

impl Revision {
    /// A fresh revision with a random id, not yet written to disk
    pub fn new(message: &str, down_revisions: Vec<String>) -> Self {
        Self {
            id: new_revision_id(),
            down_revisions,
            branch_labels: Vec::new(),
            depends_on: Vec::new(),
            message: message.trim().to_string(),
            created: Some(Utc::now().naive_utc()),
            sections: Vec::new(),
            path: None,
            checksum: String::new(),
        }
    }

    pub fn is_base(&self) -> bool {
        self.down_revisions.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.down_revisions.len() > 1
    }

    /// Revisions that must be applied before this one
    pub fn requires(&self) -> Vec<String> {
        self.down_revisions
            .iter()
            .chain(self.depends_on.iter())
            .cloned()
            .collect()
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.sql", self.id, slugify(&self.message))
    }

    /// Statements for `direction` in `dialect`
    pub fn statements(&self, direction: Direction, dialect: Dialect) -> Vec<String> {
        let specific = self
            .sections
            .iter()
            .filter(|s| s.direction == direction && s.dialect == Some(dialect))
            .collect::<Vec<_>>();
        let chosen = if specific.is_empty() {
            self.sections
                .iter()
                .filter(|s| s.direction == direction && s.dialect.is_none())
                .collect()
        } else {
            specific
        };
        chosen
            .into_iter()
            .flat_map(|s| split_statements(&s.body))
            .collect()
    }

    /// Read and parse a revision file
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrationError::InvalidFormat(format!("Invalid filename: {}", path.display())))?;
        let filename_re = Regex::new(FILENAME_PATTERN)
            .map_err(|e| MigrationError::InvalidFormat(format!("Invalid regex: {}", e)))?;
        let caps = filename_re.captures(file_name).ok_or_else(|| {
            MigrationError::InvalidFormat(format!(
                "Revision file name '{}' does not match expected pattern: {{12 hex digits}}_{{slug}}.sql",
                file_name
            ))
        })?;
        let file_id = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

        let content = fs::read_to_string(path).map_err(|e| {
            MigrationError::FileNotFound(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut revision = Self::parse(&content)
            .map_err(|e| MigrationError::InvalidFormat(format!("{}: {}", path.display(), e)))?;

        if revision.id != file_id {
            return Err(MigrationError::InvalidFormat(format!(
                "{}: header declares revision '{}' but the file name says '{}'",
                path.display(),
                revision.id,
                file_id
            )));
        }
        revision.path = Some(path.to_path_buf());
        Ok(revision)
    }

    /// Parse revision file content
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut id = None;
        let mut down_revisions = None;
        let mut branch_labels = Vec::new();
        let mut depends_on = Vec::new();
        let mut message = String::new();
        let mut created = None;
        let mut sections: Vec<Section> = Vec::new();
        let marker = Regex::new(MARKER_PATTERN).map_err(|e| e.to_string())?;
        let header = Regex::new(HEADER_PATTERN).map_err(|e| e.to_string())?;

        for line in content.lines() {
            if let Some(caps) = marker.captures(line) {
                let direction = match &caps[1] {
                    "upgrade" => Direction::Upgrade,
                    _ => Direction::Downgrade,
                };
                let dialect = match caps.get(2).map(|m| m.as_str()) {
                    Some("sqlite") => Some(Dialect::Sqlite),
                    Some(_) => Some(Dialect::Postgres),
                    None => None,
                };
                if sections
                    .iter()
                    .any(|s| s.direction == direction && s.dialect == dialect)
                {
                    return Err(format!("duplicate section '{}'", line.trim()));
                }
                sections.push(Section {
                    direction,
                    dialect,
                    body: String::new(),
                });
                continue;
            }

            if let Some(section) = sections.last_mut() {
                section.body.push_str(line);
                section.body.push('\n');
                continue;
            }

            let Some(caps) = header.captures(line) else {
                continue;
            };
            let value = caps[2].to_string();
            match &caps[1] {
                "revision" => id = Some(value),
                "down_revision" => down_revisions = Some(parse_list(&value)),
                "branch_labels" => branch_labels = parse_list(&value),
                "depends_on" => depends_on = parse_list(&value),
                "message" => message = value,
                "created" => {
                    created = Some(
                        NaiveDateTime::parse_from_str(&value, CREATED_FORMAT)
                            .map_err(|e| format!("invalid created timestamp '{}': {}", value, e))?,
                    )
                }
                _ => {}
            }
        }

        let id = id.ok_or("missing '-- revision:' header")?;
        if id.len() != 12 || !id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(format!("revision id '{}' is not 12 lowercase hex digits", id));
        }
        let down_revisions = down_revisions.ok_or("missing '-- down_revision:' header")?;
        if !sections.iter().any(|s| s.direction == Direction::Upgrade) {
            return Err("missing '-- +upgrade' section".to_string());
        }

        Ok(Self {
            id,
            down_revisions,
            branch_labels,
            depends_on,
            message,
            created,
            sections,
            path: None,
            checksum: calculate_checksum(content),
        })
    }

    /// File content for this revision
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "-- revision: {}", self.id);
        let _ = writeln!(out, "-- down_revision: {}", render_list(&self.down_revisions));
        let _ = writeln!(out, "-- branch_labels: {}", render_list(&self.branch_labels));
        let _ = writeln!(out, "-- depends_on: {}", render_list(&self.depends_on));
        let _ = writeln!(out, "-- message: {}", self.message);
        if let Some(created) = self.created {
            let _ = writeln!(out, "-- created: {}", created.format(CREATED_FORMAT));
        }
        for section in &self.sections {
            out.push('\n');
            match section.dialect {
                Some(dialect) => {
                    let _ = writeln!(out, "-- +{} {}", section.direction, dialect.name());
                }
                None => {
                    let _ = writeln!(out, "-- +{}", section.direction);
                }
            }
            out.push_str(section.body.trim_end());
            out.push('\n');
        }
        out
    }

    /// Write the revision into `dir`, returning the file path
    pub fn write(&mut self, dir: &Path) -> Result<PathBuf, MigrationError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let content = self.render();
        fs::write(&path, &content)?;
        self.checksum = calculate_checksum(&content);
        self.path = Some(path.clone());
        Ok(path)
    }
}

/// Section body from statements, each terminated with `;`
pub fn statements_body(statements: &[String]) -> String {
    statements
        .iter()
        .map(|s| format!("{};", s.trim_end_matches(';')))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn parse_list(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn render_list(values: &[String]) -> String {
    if values.is_empty() {
        "None".to_string()
    } else {
        values.join(", ")
    }
}

fn new_revision_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// File-name slug of a revision message
pub fn slugify(message: &str) -> String {
    let mut slug = String::new();
    for c in message.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug: String = slug.trim_matches('_').chars().take(40).collect();
    let slug = slug.trim_end_matches('_').to_string();
    if slug.is_empty() {
        "revision".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
-- revision: 4c1d2e3f4a5b
-- down_revision: 3b9a8c7d6e5f
-- branch_labels: None
-- depends_on: None
-- message: add fiken sync status
-- created: 2024-03-04 10:15:00

-- +upgrade
ALTER TABLE wine_batches ADD COLUMN fiken_sync_status VARCHAR(20) NOT NULL DEFAULT 'pending';

-- +downgrade
ALTER TABLE wine_batches DROP COLUMN fiken_sync_status;

-- +downgrade postgres
ALTER TABLE wine_batches DROP COLUMN IF EXISTS fiken_sync_status;
";

    #[test]
    fn test_parse_header_and_sections() {
        let rev = Revision::parse(SAMPLE).unwrap();
        assert_eq!(rev.id, "4c1d2e3f4a5b");
        assert_eq!(rev.down_revisions, vec!["3b9a8c7d6e5f"]);
        assert!(rev.branch_labels.is_empty());
        assert_eq!(rev.message, "add fiken sync status");
        assert_eq!(rev.sections.len(), 3);
        assert_eq!(rev.checksum, calculate_checksum(SAMPLE));
    }

    #[test]
    fn test_dialect_section_overrides_generic() {
        let rev = Revision::parse(SAMPLE).unwrap();
        assert_eq!(
            rev.statements(Direction::Downgrade, Dialect::Sqlite),
            vec!["ALTER TABLE wine_batches DROP COLUMN fiken_sync_status"]
        );
        assert_eq!(
            rev.statements(Direction::Downgrade, Dialect::Postgres),
            vec!["ALTER TABLE wine_batches DROP COLUMN IF EXISTS fiken_sync_status"]
        );
        assert_eq!(rev.statements(Direction::Upgrade, Dialect::Postgres).len(), 1);
    }

    #[test]
    fn test_render_parse_round_trip_keeps_merge_parents() {
        let mut rev = Revision::new("merge tasting and sales", vec!["aaaaaaaaaaaa".into(), "bbbbbbbbbbbb".into()]);
        rev.sections.push(Section {
            direction: Direction::Upgrade,
            dialect: None,
            body: String::new(),
        });
        let parsed = Revision::parse(&rev.render()).unwrap();
        assert!(parsed.is_merge());
        assert_eq!(parsed.down_revisions, rev.down_revisions);
        assert_eq!(parsed.id, rev.id);
    }

    #[test]
    fn test_missing_headers_rejected() {
        assert!(Revision::parse("-- +upgrade\nSELECT 1;").is_err());
        assert!(Revision::parse("-- revision: 4c1d2e3f4a5b\n-- +upgrade\n").is_err());
        assert!(Revision::parse("-- revision: XYZ\n-- down_revision: None\n-- +upgrade\n").is_err());
    }

    #[test]
    fn test_load_checks_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000000000000_wrong.sql");
        fs::write(&path, SAMPLE).unwrap();
        assert!(matches!(Revision::load(&path), Err(MigrationError::InvalidFormat(_))));

        let path = dir.path().join("4c1d2e3f4a5b_add_fiken_sync_status.sql");
        fs::write(&path, SAMPLE).unwrap();
        let rev = Revision::load(&path).unwrap();
        assert_eq!(rev.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add fiken_sync_status to wine batches!"), "add_fiken_sync_status_to_wine_batches");
        assert_eq!(slugify("  ***  "), "revision");
    }
}
