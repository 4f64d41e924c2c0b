#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for admitctl
//!
//! This library consolidates all functionality for the admitctl tool, which applies
//! admission policies to Kubernetes-style resources without a running cluster.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface and orchestration
//! - [`resource`]: Structured resources, GVK/GVR and Kind→Resource mapping
//! - [`policy`]: Policy documents and their loaders
//! - [`cluster`]: Read access to a cluster
//! - [`variables`]: Variable bindings supplied by the user
//! - [`context`]: Per-policy evaluation contexts
//! - [`patch`]: JSON patch decoding and application
//! - [`engine`]: Engine responses and the evaluation collaborators
//! - [`cel`]: CEL validating policies and their context providers
//! - [`processor`]: The multi-phase evaluation pipeline and result tallies

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[cfg(any(debug_assertions, test))]
pub mod commands;
#[cfg(not(any(debug_assertions, test)))]
mod commands;

pub mod cel;
pub mod cluster;
pub mod context;
pub mod engine;
pub mod patch;
pub mod policy;
pub mod processor;
pub mod resource;
pub mod variables;

pub use crate::commands::{Host, run};
