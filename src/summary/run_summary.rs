//! `run_summary.json`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use ecr_build_runner::PhaseResult;

use super::failure::{ExitCode, FailureKind, Status};

pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

pub const RUN_SUMMARY_SCHEMA_ID: &str = "ecr-ci/run_summary@1";

pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Failed,
    /// Not started because an earlier stage failed
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub action: String,
    pub status: StageStatus,
    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageSummary {
    pub fn skipped(stage: &str, action: &str) -> Self {
        Self {
            stage: stage.to_string(),
            action: action.to_string(),
            status: StageStatus::Skipped,
            duration_ms: 0,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub schema_id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub status: Status,
    pub exit_code: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    /// Full commit id the run built
    pub source_version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,

    /// Registry reference the build pushed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,

    /// Stages in pipeline order
    pub stages: Vec<StageSummary>,

    /// Build phases, empty when the build stage never ran
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseResult>,

    pub duration_ms: u64,
    pub human_summary: String,
}

impl RunSummary {
    /// Aggregate stage results. The first failed stage decides the failure.
    pub fn from_stages(
        run_id: String,
        source_version: String,
        stages: Vec<StageSummary>,
        failure_kind: Option<FailureKind>,
        duration_ms: u64,
    ) -> Self {
        let failed = stages.iter().find(|s| s.status == StageStatus::Failed);
        let (status, exit_code, failure_kind) = match (failed, failure_kind) {
            (None, _) => (Status::Success, ExitCode::Success, None),
            (Some(_), Some(kind)) => (Status::Failed, kind.exit_code(), Some(kind)),
            (Some(_), None) => (Status::Failed, ExitCode::Io, Some(FailureKind::Io)),
        };

        let human_summary = match failed {
            None => format!("Run succeeded: {}/{} stages passed", stages.len(), stages.len()),
            Some(stage) => format!(
                "Run failed in stage {}: {}",
                stage.stage,
                stage.detail.as_deref().unwrap_or("no detail")
            ),
        };

        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            created_at: Utc::now(),
            status,
            exit_code: exit_code.as_i32(),
            failure_kind,
            source_version,
            image_tag: None,
            image_uri: None,
            stages,
            phases: Vec::new(),
            duration_ms,
            human_summary,
        }
    }

    pub fn with_image(mut self, tag: String, uri: String) -> Self {
        self.image_tag = Some(tag);
        self.image_uri = Some(uri);
        self
    }

    pub fn with_phases(mut self, phases: Vec<PhaseResult>) -> Self {
        self.phases = phases;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == Status::Success
    }

    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;
        fs::write(path, json)
    }
}
