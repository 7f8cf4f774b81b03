//! `run_state.json`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::{next_seq, now_rfc3339, TerminalState};

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_ID: &str = "ecr-ci/run_state@1";

pub const RUN_STATE_FILE: &str = "run_state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Created, no stage started
    Idle,
    SourceRunning,
    BuildRunning,
    Succeeded,
    Failed,
}

impl TerminalState for PipelineState {
    fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }
}

impl PipelineState {
    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        matches!(
            (self, target),
            (PipelineState::Idle, PipelineState::SourceRunning)
                | (PipelineState::SourceRunning, PipelineState::BuildRunning)
                | (PipelineState::SourceRunning, PipelineState::Failed)
                | (PipelineState::BuildRunning, PipelineState::Succeeded)
                | (PipelineState::BuildRunning, PipelineState::Failed)
        )
    }
}

/// The stage currently executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStage {
    /// Stage index (0-based)
    pub index: usize,
    pub stage: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStateData {
    pub schema_version: u32,
    pub schema_id: String,
    pub run_id: String,
    pub state: PipelineState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// None outside the running states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<CurrentStage>,

    /// Commit the run builds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,

    /// Set when the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RunStateError {
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RunStateData {
    pub fn new(run_id: String) -> Self {
        let now = now_rfc3339();
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            run_id,
            state: PipelineState::Idle,
            created_at: now,
            updated_at: now,
            current_stage: None,
            source_version: None,
            failure_reason: None,
            seq: next_seq(),
        }
    }

    pub fn transition(&mut self, new_state: PipelineState) -> Result<(), RunStateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(RunStateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        tracing::debug!(run_id = %self.run_id, from = ?self.state, to = ?new_state, "run state transition");
        self.state = new_state;
        self.updated_at = now_rfc3339();
        self.seq = next_seq();

        if new_state.is_terminal() {
            self.current_stage = None;
        }
        Ok(())
    }

    /// IDLE → SOURCE_RUNNING
    pub fn start_source(&mut self, action: &str, source_version: &str) -> Result<(), RunStateError> {
        self.transition(PipelineState::SourceRunning)?;
        self.source_version = Some(source_version.to_string());
        self.current_stage = Some(CurrentStage {
            index: 0,
            stage: crate::pipeline::SOURCE_STAGE.to_string(),
            action: action.to_string(),
        });
        Ok(())
    }

    /// SOURCE_RUNNING → BUILD_RUNNING
    pub fn start_build(&mut self, action: &str) -> Result<(), RunStateError> {
        self.transition(PipelineState::BuildRunning)?;
        self.current_stage = Some(CurrentStage {
            index: 1,
            stage: crate::pipeline::BUILD_STAGE.to_string(),
            action: action.to_string(),
        });
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<(), RunStateError> {
        self.transition(PipelineState::Succeeded)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), RunStateError> {
        self.transition(PipelineState::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically (write-then-rename).
    pub fn write_to_file(&self, path: &Path) -> Result<(), RunStateError> {
        let json = self.to_json()?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, RunStateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    pub fn write_to_run_dir(&self, run_dir: &Path) -> Result<(), RunStateError> {
        self.write_to_file(&run_dir.join(RUN_STATE_FILE))
    }
}
