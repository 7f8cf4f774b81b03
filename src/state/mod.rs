//! Run state machine
//!
//! IDLE → SOURCE_RUNNING → BUILD_RUNNING → {SUCCEEDED | FAILED}, with
//! SOURCE_RUNNING → FAILED when the source stage fails. Terminal states
//! never transition.

mod run_state;

pub use run_state::{
    CurrentStage, PipelineState, RunStateData, RunStateError, RUN_STATE_FILE, SCHEMA_ID,
    SCHEMA_VERSION,
};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Next process-wide sequence number, for ordering state writes.
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

pub fn now_rfc3339() -> DateTime<Utc> {
    Utc::now()
}

pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
