//! Command handlers. Each returns `Ok(true)` on success and `Ok(false)` when
//! the command ran but its check failed (exit code 1).

use crate::cli::{Cli, Commands};
use anyhow::{anyhow, Context, Result};
use cellarguard::compat::{self, RuleSet};
use cellarguard::config::{
    resolve_database, CellarConfig, DatabaseTarget, EnvVars, EnvironmentSignals, StaticParameters,
};
use cellarguard::connection::open_target;
use cellarguard::guard::{GitStaged, Guard, GuardOptions};
use cellarguard::harness::{self, HarnessOptions, KeepDatabase};
use cellarguard::invocation::{self, Action, Invoker};
use cellarguard::migration::{Migrator, Revision};
use cellarguard::model::registry;
use cellarguard::CellarExecutor;
use colored::Colorize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration file values with command-line overrides applied
pub fn load_config(cli: &Cli) -> Result<CellarConfig> {
    let mut config = CellarConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(dir) = &cli.migrations_dir {
        config.migrations_dir = dir.clone();
    }
    if let Some(url) = &cli.database_url {
        config.database.url = Some(url.clone());
    }
    Ok(config)
}

pub fn run(cli: &Cli) -> Result<bool> {
    let config = load_config(cli)?;

    match &cli.command {
        Commands::Revision {
            message,
            autogenerate,
        } => handle_revision(&config, message, *autogenerate),
        Commands::Upgrade { target, dry_run } => {
            let migrator = migrator(&config)?;
            let db = connect(cli, &config)?;
            handle_upgrade(&migrator, db.as_ref(), target, *dry_run)
        }
        Commands::Downgrade { target } => {
            let migrator = migrator(&config)?;
            let db = connect(cli, &config)?;
            handle_downgrade(&migrator, db.as_ref(), target)
        }
        Commands::Current => {
            let migrator = migrator(&config)?;
            let db = connect(cli, &config)?;
            handle_current(&migrator, db.as_ref())
        }
        Commands::Status => {
            let migrator = migrator(&config)?;
            let db = connect(cli, &config)?;
            handle_status(&migrator, db.as_ref())
        }
        Commands::History { verbose } => handle_history(&migrator(&config)?, *verbose),
        Commands::Heads => handle_heads(&migrator(&config)?),
        Commands::Show { revision } => handle_show(&migrator(&config)?, revision),
        Commands::Check => handle_check(&migrator(&config)?),
        Commands::Guard { repo } => handle_guard(&config, repo),
        Commands::Compat { manifests, json } => handle_compat(&config, manifests, *json),
        Commands::Test { inspect, keep } => handle_test(&config, *inspect, *keep),
        Commands::Invoke { action } => {
            let action: Action = action.parse().map_err(|e: String| anyhow!(e))?;
            let response = invoker(cli, &config)?.invoke(action);
            println!("{}", response.to_json());
            Ok(response.is_success())
        }
        Commands::Serve { bind } => {
            let bind = bind.clone().unwrap_or_else(|| config.invocation.bind.clone());
            invocation::serve(invoker(cli, &config)?, &bind)
                .with_context(|| format!("serving on {bind}"))?;
            Ok(true)
        }
    }
}

fn migrator(config: &CellarConfig) -> Result<Migrator> {
    let migrator = Migrator::new(&config.migrations_dir)?;
    Ok(match config.database.statement_timeout_seconds {
        Some(secs) => migrator.with_statement_timeout(Duration::from_secs(secs)),
        None => migrator,
    })
}

/// Database for this run: flag or config URL, `DATABASE_URL`, then parameters
pub fn resolve_target(cli: &Cli, config: &CellarConfig) -> Result<DatabaseTarget> {
    let store = match &cli.parameters {
        Some(path) => StaticParameters::from_toml_file(path)?,
        None => StaticParameters::new(),
    };
    let signals = EnvironmentSignals::from_source(&EnvVars);
    Ok(resolve_database(&config.database, &signals, &store, &EnvVars)?)
}

fn connect(cli: &Cli, config: &CellarConfig) -> Result<Box<dyn CellarExecutor>> {
    let target = resolve_target(cli, config)?;
    log::debug!("Connecting to {}", target);
    open_target(&target).with_context(|| format!("connecting to {target}"))
}

fn invoker(cli: &Cli, config: &CellarConfig) -> Result<Invoker> {
    Ok(Invoker::new(
        config.migrations_dir.clone(),
        resolve_target(cli, config)?,
        Duration::from_secs(config.invocation.timeout_seconds),
    ))
}

fn handle_revision(config: &CellarConfig, message: &str, autogenerate: bool) -> Result<bool> {
    fs::create_dir_all(&config.migrations_dir).with_context(|| {
        format!("creating migrations directory {}", config.migrations_dir.display())
    })?;
    let migrator = migrator(config)?;
    match migrator.generate(message, autogenerate, registry())? {
        Some(revision) => {
            let path = revision
                .path
                .clone()
                .unwrap_or_else(|| config.migrations_dir.join(revision.file_name()));
            println!("{} Generated revision {}: {}", "✅".green(), revision.id, path.display());
            if autogenerate {
                println!("   Review the generated statements before committing");
            } else {
                println!("   Fill in the upgrade and downgrade sections");
            }
        }
        None => println!("No changes in schema detected"),
    }
    Ok(true)
}

fn handle_upgrade(
    migrator: &Migrator,
    db: &dyn CellarExecutor,
    target: &str,
    dry_run: bool,
) -> Result<bool> {
    if dry_run {
        let status = migrator.status(db)?;
        if status.pending.is_empty() {
            println!("No pending revisions to apply");
        } else {
            println!("Would apply {} revision(s):", status.pending.len());
            for (i, pending) in status.pending.iter().enumerate() {
                println!("  {}. {} {}", i + 1, pending.revision, pending.message);
            }
        }
        return Ok(true);
    }

    let applied = migrator.upgrade(db, target)?;
    if applied.is_empty() {
        println!("{} Already at {}", "✅".green(), target);
    } else {
        for id in &applied {
            println!("  {} {}", "↑".green(), id);
        }
        println!("{} Applied {} revision(s)", "✅".green(), applied.len());
    }
    Ok(true)
}

fn handle_downgrade(migrator: &Migrator, db: &dyn CellarExecutor, target: &str) -> Result<bool> {
    let reverted = migrator.downgrade(db, target)?;
    if reverted.is_empty() {
        println!("{} Nothing to revert", "✅".green());
    } else {
        for id in &reverted {
            println!("  {} {}", "↓".yellow(), id);
        }
        println!("{} Reverted {} revision(s)", "✅".green(), reverted.len());
    }
    Ok(true)
}

fn handle_current(migrator: &Migrator, db: &dyn CellarExecutor) -> Result<bool> {
    let heads = migrator.current(db)?;
    if heads.is_empty() {
        println!("base");
    }
    let chain_heads: Vec<String> = migrator.chain().heads().iter().map(|r| r.id.clone()).collect();
    for id in heads {
        let marker = if chain_heads.contains(&id) { " (head)" } else { "" };
        println!("{}{}", id, marker);
    }
    Ok(true)
}

fn handle_status(migrator: &Migrator, db: &dyn CellarExecutor) -> Result<bool> {
    let status = migrator.status(db)?;
    let log = migrator.applied_log(db)?;

    println!("\n📊 Migration Status\n");
    if status.applied.is_empty() {
        println!("{} Applied Revisions: None", "✅".green());
    } else {
        println!("{} Applied Revisions ({}):", "✅".green(), status.applied.len());
        for id in &status.applied {
            let record = log.iter().rev().find(|r| &r.revision == id);
            let when = record
                .map(|r| {
                    r.applied_at
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string()
                })
                .unwrap_or_else(|| "unknown".to_string());
            let time = record
                .and_then(|r| r.execution_time_ms)
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "N/A".to_string());
            println!("  ✓ {} ({}, {})", id, when, time);
        }
    }
    println!();
    if status.pending.is_empty() {
        println!("⏳ Pending Revisions: None");
    } else {
        println!("⏳ Pending Revisions ({}):", status.pending.len());
        for pending in &status.pending {
            println!("  ⏳ {} {}", pending.revision, pending.message);
        }
    }
    println!(
        "\n📈 Summary: {} applied, {} pending",
        status.applied.len(),
        status.pending.len()
    );
    Ok(true)
}

fn history_line(revision: &Revision, heads: &[String]) -> String {
    let parent = if revision.is_base() {
        "<base>".to_string()
    } else {
        revision.down_revisions.join(", ")
    };
    let mut line = format!("{} -> {}", parent, revision.id);
    if heads.contains(&revision.id) {
        line.push_str(" (head)");
    }
    if revision.is_merge() {
        line.push_str(" (mergepoint)");
    }
    format!("{}, {}", line, revision.message)
}

fn handle_history(migrator: &Migrator, verbose: bool) -> Result<bool> {
    let heads: Vec<String> = migrator.chain().heads().iter().map(|r| r.id.clone()).collect();
    for revision in migrator.history() {
        println!("{}", history_line(revision, &heads));
        if verbose {
            print_details(revision);
            println!();
        }
    }
    Ok(true)
}

fn print_details(revision: &Revision) {
    println!("    Revision ID: {}", revision.id);
    println!(
        "    Parent: {}",
        if revision.is_base() {
            "<base>".to_string()
        } else {
            revision.down_revisions.join(", ")
        }
    );
    if !revision.branch_labels.is_empty() {
        println!("    Branch labels: {}", revision.branch_labels.join(", "));
    }
    if !revision.depends_on.is_empty() {
        println!("    Depends on: {}", revision.depends_on.join(", "));
    }
    if let Some(created) = revision.created {
        println!("    Created: {}", created.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(path) = &revision.path {
        println!("    Path: {}", path.display());
    }
    println!("    Checksum: {}", revision.checksum);
}

fn handle_heads(migrator: &Migrator) -> Result<bool> {
    for head in migrator.chain().heads() {
        let label = if head.branch_labels.is_empty() {
            String::new()
        } else {
            format!(" ({})", head.branch_labels.join(", "))
        };
        println!("{} (head){}, {}", head.id, label, head.message);
    }
    Ok(true)
}

fn handle_show(migrator: &Migrator, spec: &str) -> Result<bool> {
    let revision = migrator.chain().resolve(spec)?;
    println!("\n📋 {}\n", revision.message);
    print_details(revision);
    Ok(true)
}

fn handle_check(migrator: &Migrator) -> Result<bool> {
    let changes = migrator.check(registry())?;
    if changes.is_empty() {
        println!("{} No new upgrade operations detected", "✅".green());
        return Ok(true);
    }
    eprintln!("{} The model differs from the migrated schema:", "❌".red());
    for change in &changes {
        eprintln!("    {}", change);
    }
    eprintln!("Generate a revision with: cellarguard-migrate revision --autogenerate -m \"<message>\"");
    Ok(false)
}

fn handle_guard(config: &CellarConfig, repo: &Path) -> Result<bool> {
    let guard = Guard::new(GuardOptions::from_config(config), registry())?;
    let report = guard.run(&GitStaged::new(repo))?;

    if let Some(harness) = &report.harness {
        println!("🧪 Migration harness: {}", harness.row_summary());
    }
    for finding in report.advisory.warnings() {
        println!("{} {}", "⚠".yellow(), finding);
    }
    if report.outcome.is_allowed() {
        println!("{} Commit allowed", "✅".green());
        return Ok(true);
    }
    eprintln!("{} Commit {}", "❌".red(), report.outcome);
    if let Some(remediation) = &report.remediation {
        eprintln!("\n{}", remediation);
    }
    Ok(false)
}

fn handle_compat(config: &CellarConfig, manifests: &[std::path::PathBuf], json: bool) -> Result<bool> {
    let rules = RuleSet::load(config.compat_rules.as_deref())?;
    let manifests = if manifests.is_empty() {
        config.manifests.clone()
    } else {
        manifests.to_vec()
    };
    let report = compat::scan(&manifests, &rules)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
        return Ok(report.passed());
    }
    if report.scanned.is_empty() {
        println!("No dependency manifests found");
    }
    for finding in report.blocked() {
        println!("{} {}", "BLOCKED".red().bold(), finding);
    }
    for finding in report.warnings() {
        println!("{} {}", "WARNING".yellow(), finding);
    }
    for finding in report.recommended() {
        println!("{} {}", "OK".green(), finding);
    }
    if report.passed() {
        println!("{} Dependencies are compatible with the serverless runtime", "✅".green());
    } else {
        eprintln!(
            "{} {} blocked package(s); replace them before deploying",
            "❌".red(),
            report.blocked().len()
        );
    }
    Ok(report.passed())
}

fn handle_test(config: &CellarConfig, inspect: bool, keep: bool) -> Result<bool> {
    let report = harness::run(&HarnessOptions {
        migrations_dir: config.migrations_dir.clone(),
        keep_database: if keep {
            KeepDatabase::Always
        } else {
            KeepDatabase::OnFailure
        },
    })?;

    println!("🧪 Applied {} revision(s)", report.applied.len());
    if inspect {
        println!("\n{}", harness::describe(&report));
    }
    if let Some(db) = &report.kept_database {
        println!("Database kept at {}", db.display());
    }
    if report.passed() {
        println!("{} {}", "✅".green(), report.row_summary());
        return Ok(true);
    }
    for failure in &report.failures {
        eprintln!("{} {}", "❌".red(), failure);
    }
    Ok(false)
}
