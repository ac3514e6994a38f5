//! # Cellarguard
//!
//! Schema model, migration engine and commit guardrails for the Arctan Wines
//! import CRM.
//!
//! Money is stored as integers in the smallest currency unit ([`money`]).
//! Tables are declared as metadata ([`model`]) and evolved through SQL
//! revision files ([`migration`]). Before a commit, the [`guard`] refuses model
//! changes that arrive without a revision, the [`harness`] replays the chain
//! into a scratch SQLite database with fixtures, and [`compat`] flags
//! dependencies that cannot be packaged for the serverless runtime.

pub mod compat;
pub mod config;
pub mod connection;
pub mod executor;
pub mod guard;
pub mod harness;
pub mod invocation;
pub mod migration;
pub mod model;
pub mod money;
pub mod sqlite;

pub use config::{CellarConfig, DatabaseTarget};
pub use connection::{open_target, PostgresExecutor};
pub use executor::{CellarExecutor, DbError, Dialect};
pub use money::{Cents, ExchangeRate, Ore};
pub use sqlite::SqliteExecutor;
