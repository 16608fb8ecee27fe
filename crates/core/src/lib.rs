//! Core library for bakeflow
//!
//! This crate contains the bake orchestration engine: definition resolution,
//! argument assembly, subprocess execution and classification, build
//! reference resolution, cross-phase persisted state, and the post-phase
//! finalizer, together with logging and error handling.

pub mod artifact;
pub mod bake;
pub mod builder;
pub mod command_file;
pub mod engine;
pub mod env;
pub mod errors;
pub mod finalize;
pub mod history;
pub mod inputs;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod redaction;
pub mod refs;
pub mod state;
pub mod summary;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
