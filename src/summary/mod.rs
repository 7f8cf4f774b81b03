//! Run summary and failure taxonomy.

mod failure;
mod run_summary;

pub use failure::{ExitCode, FailureKind, Status};
pub use run_summary::{
    RunSummary, StageStatus, StageSummary, RUN_SUMMARY_FILE, RUN_SUMMARY_SCHEMA_ID,
    RUN_SUMMARY_SCHEMA_VERSION,
};
