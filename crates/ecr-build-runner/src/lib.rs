//! Local execution of buildspec phases.
//!
//! The runner reproduces the execution contract of the managed build
//! service on a developer machine:
//! - phases run in the fixed order install, pre_build, build, post_build
//! - all commands share one shell session, so variables persist
//! - the first non-zero command aborts its phase and every later phase
//! - output is captured to a log file

mod outcome;
mod runner;
mod script;

pub use outcome::{
    reduce_markers, BuildOutcome, BuildStatus, CommandFailure, PhaseResult, PhaseStatus,
};
pub use runner::{BuildRunner, RunnerConfig, RunnerError, ENV_ALLOWLIST};
pub use script::{render_script, split_marker, Marker, MARKER_PREFIX};
