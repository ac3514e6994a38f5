//! Serverless runtime compatibility checks for dependency manifests.
//!
//! Packages are classified as blocked (deployment will fail; a replacement
//! is named), warning (works with extra packaging effort) or recommended
//! (known good). Python manifests (`requirements.txt`, `pyproject.toml`) and
//! Cargo manifests are scanned. Only blocked findings fail a check.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const REQUIREMENT_NAME_PATTERN: &str = r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)";

#[derive(Debug, Error)]
pub enum CompatError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("invalid compatibility rules: {0}")]
    Rules(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Blocked,
    Warning,
    Recommended,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Blocked => "blocked",
            Classification::Warning => "warning",
            Classification::Recommended => "recommended",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Python,
    Rust,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Rule {
    pub package: String,
    pub ecosystem: Ecosystem,
    pub classification: Classification,
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<Rule>,
}

/// Compatibility rules keyed by ecosystem and normalized package name
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: BTreeMap<(Ecosystem, String), Rule>,
}

impl RuleSet {
    /// Rules known to matter for the Python and Rust serverless functions
    pub fn builtin() -> Self {
        use Classification::*;
        use Ecosystem::*;

        let table: &[(Ecosystem, &str, Classification, Option<&str>, &str)] = &[
            (Python, "psycopg2", Blocked, Some("psycopg2-binary"), "requires compiling against libpq"),
            (Python, "pydantic-core", Blocked, Some("pydantic<2"), "compiled extension built for the build host"),
            (Python, "lxml", Blocked, Some("xml.etree.ElementTree"), "contains C extensions"),
            (Python, "opencv-python", Blocked, Some("opencv-python-headless"), "large binary package linked against GUI libraries"),
            (Python, "pyodbc", Blocked, Some("pg8000"), "contains C extensions and needs system ODBC drivers"),
            (Python, "mysqlclient", Blocked, Some("PyMySQL"), "contains C extensions"),
            (Python, "cx-oracle", Blocked, Some("oracledb"), "contains C extensions and needs Oracle client libraries"),
            (Python, "pillow", Warning, None, "contains C extensions; package for the runtime or use a layer"),
            (Python, "numpy", Warning, None, "large binary package; consider a layer"),
            (Python, "pandas", Warning, None, "large binary package with C extensions; consider a layer"),
            (Python, "scipy", Warning, None, "large binary package with C extensions; consider a layer"),
            (Python, "matplotlib", Warning, None, "large binary package with C extensions; consider a layer"),
            (Python, "cryptography", Warning, None, "contains C extensions; may need a runtime-specific wheel"),
            (Python, "psycopg2-binary", Recommended, None, "self-contained PostgreSQL driver"),
            (Python, "pg8000", Recommended, None, "pure Python PostgreSQL driver"),
            (Python, "pymysql", Recommended, None, "pure Python MySQL driver"),
            (Python, "boto3", Recommended, None, "provided by the runtime"),
            (Python, "requests", Recommended, None, "pure Python HTTP client"),
            (Python, "sqlalchemy", Recommended, None, "pure Python with compatible drivers"),
            (Python, "alembic", Recommended, None, "pure Python"),
            (Python, "pydantic", Recommended, None, "pure Python below v2"),
            (Rust, "pq-sys", Blocked, Some("may_postgres"), "links libpq, which the runtime does not ship"),
            (Rust, "openssl-sys", Warning, Some("rustls"), "needs a vendored OpenSSL build for the runtime"),
            (Rust, "native-tls", Warning, Some("rustls"), "uses the system TLS library"),
            (Rust, "rustls", Recommended, None, "pure Rust TLS"),
            (Rust, "rusqlite", Recommended, None, "bundled SQLite builds statically"),
        ];

        let mut set = Self::default();
        for (ecosystem, package, classification, replacement, reason) in table {
            set.insert(Rule {
                package: package.to_string(),
                ecosystem: *ecosystem,
                classification: *classification,
                replacement: replacement.map(str::to_string),
                reason: reason.to_string(),
            });
        }
        set
    }

    /// Add or replace a rule
    pub fn insert(&mut self, rule: Rule) {
        self.rules
            .insert((rule.ecosystem, normalize_name(&rule.package)), rule);
    }

    /// Merge `[[rule]]` entries from a TOML file over the current rules
    pub fn extend_from_toml(&mut self, text: &str) -> Result<(), CompatError> {
        let file: RuleFile = toml::from_str(text).map_err(|e| CompatError::Rules(e.to_string()))?;
        for rule in file.rules {
            if rule.classification == Classification::Blocked && rule.replacement.is_none() {
                return Err(CompatError::Rules(format!(
                    "blocked package '{}' must name a replacement",
                    rule.package
                )));
            }
            self.insert(rule);
        }
        Ok(())
    }

    /// Built-in rules, extended by `overrides` when given
    pub fn load(overrides: Option<&Path>) -> Result<Self, CompatError> {
        let mut set = Self::builtin();
        if let Some(path) = overrides {
            let text = std::fs::read_to_string(path).map_err(|source| CompatError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            set.extend_from_toml(&text)?;
            log::debug!("loaded compatibility rule overrides from {}", path.display());
        }
        Ok(set)
    }

    pub fn classify(&self, ecosystem: Ecosystem, package: &str) -> Option<&Rule> {
        self.rules.get(&(ecosystem, normalize_name(package)))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Lowercase with `_` and `.` folded to `-`
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(['_', '.'], "-")
}

/// A dependency declared by a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub package: String,
    pub ecosystem: Ecosystem,
    /// 1-based line, when it could be located
    pub line: Option<usize>,
}

/// One classified dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub package: String,
    pub classification: Classification,
    pub suggested_replacement: Option<String>,
    pub reason: String,
    pub manifest: String,
    pub line: Option<usize>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{} - {}: {}", self.manifest, line, self.package, self.reason)?,
            None => write!(f, "{} - {}: {}", self.manifest, self.package, self.reason)?,
        }
        if let Some(replacement) = &self.suggested_replacement {
            write!(f, " (replace with {replacement})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompatReport {
    pub findings: Vec<Finding>,
    pub scanned: Vec<String>,
}

impl CompatReport {
    fn with(&self, classification: Classification) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.classification == classification)
            .collect()
    }

    pub fn blocked(&self) -> Vec<&Finding> {
        self.with(Classification::Blocked)
    }

    pub fn warnings(&self) -> Vec<&Finding> {
        self.with(Classification::Warning)
    }

    pub fn recommended(&self) -> Vec<&Finding> {
        self.with(Classification::Recommended)
    }

    /// Warnings are advisory; any blocked package fails the check
    pub fn passed(&self) -> bool {
        self.blocked().is_empty()
    }

    pub fn merge(&mut self, other: CompatReport) {
        self.findings.extend(other.findings);
        self.scanned.extend(other.scanned);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "passed": self.passed(),
            "scanned": self.scanned,
            "findings": self.findings,
        })
    }
}

/// Scan every manifest that exists; missing ones are skipped
pub fn scan(manifests: &[PathBuf], rules: &RuleSet) -> Result<CompatReport, CompatError> {
    let mut report = CompatReport::default();
    for path in manifests {
        if !path.is_file() {
            log::debug!("skipping missing manifest {}", path.display());
            continue;
        }
        let text = std::fs::read_to_string(path).map_err(|source| CompatError::Io {
            path: path.clone(),
            source,
        })?;
        report.merge(scan_manifest(path, &text, rules)?);
    }
    Ok(report)
}

/// Classify the dependencies of one manifest's contents
pub fn scan_manifest(path: &Path, text: &str, rules: &RuleSet) -> Result<CompatReport, CompatError> {
    let dependencies = parse_manifest(path, text)?;
    let manifest = path.display().to_string();
    log::info!("Checking {} ({} dependencies)", manifest, dependencies.len());

    let findings = dependencies
        .iter()
        .filter_map(|dep| {
            rules.classify(dep.ecosystem, &dep.package).map(|rule| Finding {
                package: dep.package.clone(),
                classification: rule.classification,
                suggested_replacement: rule.replacement.clone(),
                reason: rule.reason.clone(),
                manifest: manifest.clone(),
                line: dep.line,
            })
        })
        .collect();

    Ok(CompatReport {
        findings,
        scanned: vec![manifest],
    })
}

/// Dispatch on the file name
pub fn parse_manifest(path: &Path, text: &str) -> Result<Vec<Dependency>, CompatError> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let parse_err = |message: String| CompatError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match name {
        "pyproject.toml" => parse_pyproject(text).map_err(parse_err),
        "Cargo.toml" => parse_cargo_manifest(text).map_err(parse_err),
        _ => parse_requirements(text).map_err(parse_err),
    }
}

/// `requirements.txt`: one requirement per line, options and comments ignored
pub fn parse_requirements(text: &str) -> Result<Vec<Dependency>, String> {
    let pattern = Regex::new(REQUIREMENT_NAME_PATTERN).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        if let Some(caps) = pattern.captures(line) {
            out.push(Dependency {
                package: caps[1].to_string(),
                ecosystem: Ecosystem::Python,
                line: Some(idx + 1),
            });
        }
    }
    Ok(out)
}

/// `[project].dependencies`, optional dependency groups and Poetry dependencies
pub fn parse_pyproject(text: &str) -> Result<Vec<Dependency>, String> {
    let pattern = Regex::new(REQUIREMENT_NAME_PATTERN).map_err(|e| e.to_string())?;
    let doc: toml::Table = toml::from_str(text).map_err(|e| e.to_string())?;
    let mut names = Vec::new();

    if let Some(project) = doc.get("project").and_then(|p| p.as_table()) {
        let mut specs: Vec<&toml::Value> = project
            .get("dependencies")
            .and_then(|d| d.as_array())
            .map(|a| a.iter().collect())
            .unwrap_or_default();
        if let Some(groups) = project.get("optional-dependencies").and_then(|g| g.as_table()) {
            for group in groups.values().filter_map(|g| g.as_array()) {
                specs.extend(group.iter());
            }
        }
        for spec in specs.into_iter().filter_map(|s| s.as_str()) {
            if let Some(caps) = pattern.captures(spec) {
                names.push(caps[1].to_string());
            }
        }
    }

    let poetry = doc
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_table());
    if let Some(deps) = poetry {
        names.extend(deps.keys().filter(|k| k.as_str() != "python").cloned());
    }

    Ok(names
        .into_iter()
        .map(|package| Dependency {
            line: line_of(text, &package),
            package,
            ecosystem: Ecosystem::Python,
        })
        .collect())
}

/// Deployed dependency tables of a Cargo manifest; dev-dependencies are skipped
pub fn parse_cargo_manifest(text: &str) -> Result<Vec<Dependency>, String> {
    let doc: toml::Table = toml::from_str(text).map_err(|e| e.to_string())?;
    let mut tables: Vec<&toml::Table> = Vec::new();

    for key in ["dependencies", "build-dependencies"] {
        if let Some(t) = doc.get(key).and_then(|v| v.as_table()) {
            tables.push(t);
        }
    }
    if let Some(t) = doc
        .get("workspace")
        .and_then(|w| w.get("dependencies"))
        .and_then(|v| v.as_table())
    {
        tables.push(t);
    }
    if let Some(targets) = doc.get("target").and_then(|v| v.as_table()) {
        for target in targets.values() {
            if let Some(t) = target.get("dependencies").and_then(|v| v.as_table()) {
                tables.push(t);
            }
        }
    }

    let mut out: Vec<Dependency> = Vec::new();
    for table in tables {
        for (key, value) in table {
            // `alias = { package = "real-name" }`
            let package = value
                .get("package")
                .and_then(|p| p.as_str())
                .unwrap_or(key)
                .to_string();
            if out.iter().any(|d| d.package == package) {
                continue;
            }
            out.push(Dependency {
                line: line_of(text, key),
                package,
                ecosystem: Ecosystem::Rust,
            });
        }
    }
    Ok(out)
}

/// First line mentioning `name` as a key or quoted requirement
fn line_of(text: &str, name: &str) -> Option<usize> {
    text.lines()
        .position(|line| {
            let trimmed = line.trim_start().trim_start_matches('"');
            trimmed.starts_with(name)
                && trimmed[name.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| !(c.is_alphanumeric() || c == '-' || c == '_'))
        })
        .map(|idx| idx + 1)
}
