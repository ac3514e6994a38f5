//! Cellarguard Migration CLI library
//!
//! The `cellarguard-migrate` binary is a thin wrapper over [`commands::run`],
//! which keeps every command callable from tests.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
