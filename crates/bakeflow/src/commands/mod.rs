//! Command implementations
//!
//! One module per phase of the CI step.

pub mod main_phase;
pub mod post_phase;
