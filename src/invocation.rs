//! Serverless migration entry point.
//!
//! [`Invoker::invoke`] is transport neutral and returns the JSON body a
//! function runtime would hand back. [`serve`] exposes the same actions over
//! HTTP (`GET|POST /{action}`) with `may_minihttp`, each request bounded by
//! the configured invocation timeout.

use crate::config::DatabaseTarget;
use crate::connection::open_target;
use crate::migration::Migrator;
use may_minihttp::{HttpServer, HttpService, Request, Response};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Health,
    Upgrade,
    Current,
    History,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Health, Action::Upgrade, Action::Current, Action::History];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Health => "health",
            Action::Upgrade => "upgrade",
            Action::Current => "current",
            Action::History => "history",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                format!(
                    "Unknown action '{}'. Supported actions: health, upgrade, current, history",
                    s
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Body of every invocation response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResponse {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl InvocationResponse {
    fn success(message: &str, output: String) -> Self {
        Self {
            status: Status::Success,
            message: message.to_string(),
            output: Some(output),
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: Status::Error,
            message,
            output: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","message":"response encoding failed: {}"}}"#, e)
        })
    }
}

/// Runs migration actions against one resolved database
#[derive(Debug, Clone)]
pub struct Invoker {
    migrations_dir: PathBuf,
    target: DatabaseTarget,
    timeout: Duration,
    /// Shared by clones; set while an upgrade is applying
    upgrading: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the upgrade finishes, even if abandoned
struct UpgradeSlot {
    flag: Arc<AtomicBool>,
}

impl UpgradeSlot {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for UpgradeSlot {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Invoker {
    pub fn new(migrations_dir: impl Into<PathBuf>, target: DatabaseTarget, timeout: Duration) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            target,
            timeout,
            upgrading: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True while an upgrade, possibly one abandoned by a timeout, is still applying
    pub fn is_upgrading(&self) -> bool {
        self.upgrading.load(Ordering::Acquire)
    }

    pub fn invoke(&self, action: Action) -> InvocationResponse {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("invoke", action = action.as_str()).entered();

        let started = Instant::now();
        log::info!("Invocation: {}", action.as_str());
        let response = match action {
            Action::Health => InvocationResponse::success(
                "Migration function is healthy",
                format!("migrations directory: {}", self.migrations_dir.display()),
            ),
            Action::Upgrade => self.upgrade(),
            Action::Current => self.current(),
            Action::History => self.history(),
        };
        if response.is_success() {
            log::info!("{} finished in {:?}", action.as_str(), started.elapsed());
        } else {
            log::error!("{} failed: {}", action.as_str(), response.message);
        }
        response
    }

    /// Runs `action` on a coroutine and gives up after the configured timeout.
    ///
    /// The abandoned coroutine keeps running and keeps the upgrade slot, so a
    /// later upgrade is refused until it finishes. A Postgres statement timeout
    /// set on the migrator bounds it on the database side.
    pub fn invoke_bounded(&self, action: Action) -> InvocationResponse {
        let (tx, rx) = may::sync::mpsc::channel();
        let invoker = self.clone();
        may::go!(move || {
            let _ = tx.send(invoker.invoke(action));
        });
        match rx.recv_timeout(self.timeout) {
            Ok(response) => response,
            Err(_) => InvocationResponse::error(format!(
                "{} did not finish within {:?} and is still running; split long migrations into smaller revisions",
                action.as_str(),
                self.timeout
            )),
        }
    }

    fn migrator(&self) -> Result<Migrator, String> {
        Migrator::new(&self.migrations_dir)
            .map(|m| m.with_statement_timeout(self.timeout))
            .map_err(|e| e.to_string())
    }

    fn upgrade(&self) -> InvocationResponse {
        let Some(_slot) = UpgradeSlot::acquire(&self.upgrading) else {
            return InvocationResponse::error(
                "Migration failed: an upgrade is already running; retry once it finishes".to_string(),
            );
        };
        let result = self.migrator().and_then(|migrator| {
            let db = open_target(&self.target).map_err(|e| e.to_string())?;
            log::info!("Upgrading {}", self.target);
            migrator.upgrade(db.as_ref(), "head").map_err(|e| e.to_string())
        });
        match result {
            Ok(applied) if applied.is_empty() => {
                InvocationResponse::success("Migrations completed successfully", "Already at head".to_string())
            }
            Ok(applied) => InvocationResponse::success(
                "Migrations completed successfully",
                applied
                    .iter()
                    .map(|id| format!("Applied {id}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Err(e) => InvocationResponse::error(format!("Migration failed: {e}")),
        }
    }

    fn current(&self) -> InvocationResponse {
        let result = self.migrator().and_then(|migrator| {
            let db = open_target(&self.target).map_err(|e| e.to_string())?;
            migrator.current(db.as_ref()).map_err(|e| e.to_string())
        });
        match result {
            Ok(heads) if heads.is_empty() => {
                InvocationResponse::success("Current revision retrieved", "base".to_string())
            }
            Ok(heads) => InvocationResponse::success("Current revision retrieved", heads.join("\n")),
            Err(e) => InvocationResponse::error(format!("Failed to get current revision: {e}")),
        }
    }

    fn history(&self) -> InvocationResponse {
        match self.migrator() {
            Ok(migrator) => {
                let heads: Vec<String> = migrator.chain().heads().iter().map(|r| r.id.clone()).collect();
                let lines = migrator
                    .history()
                    .into_iter()
                    .map(|r| {
                        let parent = if r.is_base() {
                            "<base>".to_string()
                        } else {
                            r.down_revisions.join(", ")
                        };
                        let head = if heads.contains(&r.id) { " (head)" } else { "" };
                        format!("{} -> {}{}, {}", parent, r.id, head, r.message)
                    })
                    .collect::<Vec<_>>();
                InvocationResponse::success("Migration history retrieved", lines.join("\n"))
            }
            Err(e) => InvocationResponse::error(format!("Failed to get history: {e}")),
        }
    }
}

#[derive(Clone)]
struct InvocationService {
    invoker: Arc<Invoker>,
}

impl InvocationService {
    /// Status line and body for a request path
    fn route(&self, path: &str) -> (usize, &'static str, InvocationResponse) {
        let name = path.trim_matches('/').split('?').next().unwrap_or_default();
        match name.parse::<Action>() {
            Ok(action) => {
                let response = self.invoker.invoke_bounded(action);
                if response.is_success() {
                    (200, "OK", response)
                } else {
                    (500, "Internal Server Error", response)
                }
            }
            Err(message) => (404, "Not Found", InvocationResponse::error(message)),
        }
    }
}

impl HttpService for InvocationService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        res.header("Content-Type: application/json");
        let (code, reason, response) = self.route(req.path());
        res.status_code(code, reason);
        res.body_vec(response.to_json().into_bytes());
        Ok(())
    }
}

/// Serve invocations on `bind` until the server stops
pub fn serve(invoker: Invoker, bind: &str) -> io::Result<()> {
    let service = InvocationService {
        invoker: Arc::new(invoker),
    };
    let server = HttpServer(service).start(bind)?;
    log::info!("Migration invocation endpoint listening on http://{}", bind);
    server
        .join()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("server stopped: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sqlite_invoker(dir: &tempfile::TempDir) -> Invoker {
        let migrations = dir.path().join("migrations");
        fs::create_dir(&migrations).unwrap();
        fs::write(
            migrations.join("a1b2c3d4e5f6_create_suppliers.sql"),
            "-- revision: a1b2c3d4e5f6\n-- down_revision: None\n-- branch_labels: None\n\
             -- depends_on: None\n-- message: create suppliers\n-- created: 2024-01-15 09:00:00\n\n\
             -- +upgrade\nCREATE TABLE suppliers (id UUID NOT NULL PRIMARY KEY, name VARCHAR(200) NOT NULL);\n\n\
             -- +downgrade\nDROP TABLE suppliers;\n",
        )
        .unwrap();
        Invoker::new(
            migrations,
            DatabaseTarget::Sqlite {
                path: dir.path().join("lambda.db"),
            },
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_parse_action() {
        assert_eq!("upgrade".parse::<Action>(), Ok(Action::Upgrade));
        assert_eq!(" History ".parse::<Action>(), Ok(Action::History));
        assert!("drop_everything".parse::<Action>().unwrap_err().contains("Supported actions"));
    }

    #[test]
    fn test_health_does_not_touch_database() {
        let invoker = Invoker::new(
            "missing",
            DatabaseTarget::Postgres {
                url: "postgresql://nobody@127.0.0.1:1/none".into(),
            },
            Duration::from_secs(1),
        );
        let response = invoker.invoke(Action::Health);
        assert!(response.is_success());
        let json: serde_json::Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["message"], "Migration function is healthy");
    }

    #[test]
    fn test_upgrade_then_current_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = sqlite_invoker(&dir);

        assert_eq!(invoker.invoke(Action::Current).output.as_deref(), Some("base"));

        let upgraded = invoker.invoke(Action::Upgrade);
        assert!(upgraded.is_success(), "{}", upgraded.message);
        assert_eq!(upgraded.output.as_deref(), Some("Applied a1b2c3d4e5f6"));

        let again = invoker.invoke(Action::Upgrade);
        assert_eq!(again.output.as_deref(), Some("Already at head"));

        assert_eq!(invoker.invoke(Action::Current).output.as_deref(), Some("a1b2c3d4e5f6"));
        assert_eq!(
            invoker.invoke(Action::History).output.as_deref(),
            Some("<base> -> a1b2c3d4e5f6 (head), create suppliers")
        );
    }

    #[test]
    fn test_timed_out_upgrade_holds_the_slot_until_it_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let mut invoker = sqlite_invoker(&dir);
        invoker.timeout = Duration::from_millis(200);

        // an exclusive lock stalls the upgrade inside SQLite's busy wait
        let lock = rusqlite::Connection::open(dir.path().join("lambda.db")).unwrap();
        lock.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let timed_out = invoker.invoke_bounded(Action::Upgrade);
        assert_eq!(timed_out.status, Status::Error);
        assert!(timed_out.message.contains("still running"), "{}", timed_out.message);
        assert!(invoker.is_upgrading());

        let busy = invoker.invoke(Action::Upgrade);
        assert_eq!(busy.status, Status::Error);
        assert!(busy.message.contains("already running"), "{}", busy.message);

        lock.execute_batch("COMMIT;").unwrap();
        drop(lock);
        for _ in 0..100 {
            if !invoker.is_upgrading() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(!invoker.is_upgrading());
        assert_eq!(invoker.invoke(Action::Current).output.as_deref(), Some("a1b2c3d4e5f6"));
    }

    #[test]
    fn test_route_maps_responses_to_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let service = InvocationService {
            invoker: Arc::new(sqlite_invoker(&dir)),
        };

        let (code, reason, response) = service.route("/upgrade");
        assert_eq!((code, reason), (200, "OK"));
        assert!(response.is_success());

        let (code, _, response) = service.route("/current?verbose=1");
        assert_eq!(code, 200);
        assert_eq!(response.output.as_deref(), Some("a1b2c3d4e5f6"));

        let (code, reason, response) = service.route("/drop");
        assert_eq!((code, reason), (404, "Not Found"));
        assert!(response.message.contains("Supported actions"));

        let broken = InvocationService {
            invoker: Arc::new(Invoker::new(
                dir.path().join("nowhere"),
                DatabaseTarget::Sqlite {
                    path: dir.path().join("other.db"),
                },
                Duration::from_secs(5),
            )),
        };
        let (code, reason, response) = broken.route("/history");
        assert_eq!((code, reason), (500, "Internal Server Error"));
        assert!(response.message.starts_with("Failed to get history:"));
    }

    #[test]
    fn test_failure_is_reported_as_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = Invoker::new(
            dir.path().join("nowhere"),
            DatabaseTarget::Sqlite {
                path: dir.path().join("lambda.db"),
            },
            Duration::from_secs(5),
        );
        let response = invoker.invoke(Action::Upgrade);
        assert_eq!(response.status, Status::Error);
        assert!(response.message.starts_with("Migration failed:"));
        assert!(response.output.is_none());
    }
}
