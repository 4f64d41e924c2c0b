//! Command-line interface and orchestration for admitctl
//!
//! This module implements the CLI commands and wires the library together to
//! evaluate policies against resource files. It handles argument parsing,
//! configuration management and console output.
//!
//! ## Commands
//!
//! - **apply**: Load policies, resources and variables, run every resource through
//!   a [`PolicyProcessor`](crate::processor::PolicyProcessor), print mutated and
//!   generated resources followed by a pass/fail/warn/error/skip summary
//! - **init**: Generate a default configuration file
//!
//! ## Execution Flow
//!
//! The `run` function parses command-line arguments using clap and routes
//! to the appropriate command handler. All console output goes through a
//! [`Host`] so the commands can be driven from tests.
//!
//! Configuration is read from `admitctl.toml` when present. Command-line flags
//! take precedence over it.

mod apply;
mod common;
mod config;
mod host;
mod init;
mod run;
mod summary;

#[cfg(debug_assertions)]
pub use config::Config;

pub use apply::{ApplyArgs, apply_policies};
pub use host::Host;
pub use init::{InitArgs, init_config};
pub use run::run;
