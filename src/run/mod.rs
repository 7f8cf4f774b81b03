//! Local pipeline runs
//!
//! Replays one push event through the pipeline on this machine:
//! - the trigger decides whether the push starts a run
//! - the source stage snapshots the checkout into the source artifact
//! - the build stage runs the buildspec phases against the unpacked source
//!
//! Every run gets `<runs_dir>/<run_id>/` holding `run_state.json` (rewritten
//! at each transition), the stage artifacts under `artifacts/` and a final
//! `run_summary.json`.

mod provider;

pub use provider::{BuildExecutor, LocalCheckout, SourceProvider};

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ecr_build_runner::{BuildOutcome, BuildStatus, RunnerError};
use ecr_buildspec::{
    EnvironmentVariable, ACCOUNT_ID_VAR, IMAGE_REPO_NAME_VAR, REGION_VAR, SOURCE_DIR_VAR,
    SOURCE_VERSION_VAR,
};

use crate::config::EffectiveConfig;
use crate::naming::{derive_image_tag, NameError, StackEnv};
use crate::pipeline::{Action, BUILD_STAGE, SOURCE_STAGE};
use crate::source::{
    IgnoreReason, PushEvent, SnapshotError, SourceRevision, SourceTrigger,
    TriggerDecision, TriggerError,
};
use crate::stack::EcrCiStack;
use crate::state::{RunStateData, RunStateError};
use crate::summary::{
    ExitCode, FailureKind, RunSummary, StageStatus, StageSummary, RUN_SUMMARY_FILE,
};

pub const ARTIFACTS_DIR: &str = "artifacts";
pub const WORK_DIR: &str = "src";
pub const BUILD_LOG_FILE: &str = "build.log";
pub const IMAGE_RECORD_FILE: &str = "image.json";
pub const EFFECTIVE_CONFIG_FILE: &str = "effective_config.json";

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("run state: {0}")]
    State(#[from] RunStateError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RunError::Trigger(TriggerError::Authentication { .. }) => {
                FailureKind::TriggerAuthentication
            }
            RunError::Trigger(TriggerError::InvalidEvent(_)) => FailureKind::Configuration,
            RunError::Configuration(_) | RunError::Name(_) => FailureKind::Configuration,
            RunError::State(_) | RunError::Io(_) | RunError::Json(_) => FailureKind::Io,
        }
    }
}

/// What the build pushed, written next to the build log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub repository: String,
    pub tag: String,
    pub image_uri: String,
    pub source_version: String,
}

/// Result of replaying one event.
#[derive(Debug, Clone)]
pub enum RunReport {
    /// The trigger did not fire; no run directory was created
    Ignored(IgnoreReason),
    Completed {
        run_dir: PathBuf,
        summary: RunSummary,
    },
}

impl RunReport {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RunReport::Ignored(_) => ExitCode::Success,
            RunReport::Completed { summary, .. } => {
                ExitCode::from_i32(summary.exit_code).unwrap_or(ExitCode::Io)
            }
        }
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunReport::Ignored(_) => None,
            RunReport::Completed { summary, .. } => Some(summary),
        }
    }
}

/// The pipeline, executed locally.
pub struct LocalPipeline<S, B> {
    stack: EcrCiStack,
    trigger: SourceTrigger,
    source: S,
    executor: B,
    runs_dir: PathBuf,
    env: StackEnv,
    effective: Option<EffectiveConfig>,
}

impl<S: SourceProvider, B: BuildExecutor> LocalPipeline<S, B> {
    /// Resolve credentials before anything runs.
    ///
    /// `lookup` reads the environment (normally `std::env::var`). The source
    /// token must be present and plausible; account and region come from the stack config or
    /// from `AWS_ACCOUNT_ID` / `AWS_REGION`.
    pub fn new<F>(stack: EcrCiStack, source: S, executor: B, lookup: F) -> Result<Self, RunError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let trigger = SourceTrigger::new(stack.source().clone());
        trigger.source().token.check(&lookup)?;

        let account = stack
            .env()
            .account
            .clone()
            .or_else(|| lookup(ACCOUNT_ID_VAR))
            .ok_or_else(|| {
                RunError::Configuration(format!(
                    "local runs need env.account or {}",
                    ACCOUNT_ID_VAR
                ))
            })?;
        let region = stack
            .env()
            .region
            .clone()
            .or_else(|| lookup(REGION_VAR))
            .ok_or_else(|| {
                RunError::Configuration(format!("local runs need env.region or {}", REGION_VAR))
            })?;
        let env = StackEnv::new(Some(account), Some(region))?;

        let runs_dir = stack.config().run.runs_dir.clone();
        Ok(Self {
            stack,
            trigger,
            source,
            executor,
            runs_dir,
            env,
            effective: None,
        })
    }

    pub fn with_runs_dir(mut self, runs_dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = runs_dir.into();
        self
    }

    /// Record this config in every run directory.
    pub fn with_effective_config(mut self, effective: EffectiveConfig) -> Self {
        self.effective = Some(effective);
        self
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Variables injected into the build session.
    pub fn build_variables(&self, revision: &SourceRevision, src_dir: &Path) -> Vec<EnvironmentVariable> {
        vec![
            EnvironmentVariable::plaintext(ACCOUNT_ID_VAR, self.env.account_expr()),
            EnvironmentVariable::plaintext(REGION_VAR, self.env.region_expr()),
            EnvironmentVariable::plaintext(IMAGE_REPO_NAME_VAR, self.stack.repository().as_str()),
            EnvironmentVariable::plaintext(SOURCE_VERSION_VAR, revision.commit.as_str()),
            EnvironmentVariable::plaintext(SOURCE_DIR_VAR, src_dir.to_string_lossy()),
        ]
    }

    /// Evaluate `event` and, when it fires, run both stages.
    pub fn execute(&self, event: &PushEvent) -> Result<RunReport, RunError> {
        let revision = match self.trigger.evaluate(event) {
            TriggerDecision::Ignore(reason) => return Ok(RunReport::Ignored(reason)),
            TriggerDecision::Fire(revision) => revision,
        };

        let (source_action, build_action) = self.actions()?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let run_dir = self.runs_dir.join(&run_id);
        fs::create_dir_all(&run_dir)?;

        if let Some(effective) = &self.effective {
            let recorded = effective.clone().with_run_id(run_id.clone());
            fs::write(run_dir.join(EFFECTIVE_CONFIG_FILE), recorded.to_json()?)?;
        }

        let mut state = RunStateData::new(run_id.clone());
        state.write_to_run_dir(&run_dir)?;

        tracing::info!(
            run_id = %run_id,
            commit = %revision.commit,
            run_dir = %run_dir.display(),
            "pipeline run started"
        );
        let started = Instant::now();

        // Source stage
        state.start_source(source_action.name(), &revision.commit)?;
        state.write_to_run_dir(&run_dir)?;

        let source_dir = artifact_dir(&run_dir, source_action);
        let work_dir = run_dir.join(WORK_DIR);
        let stage_started = Instant::now();
        let fetched = self.source.fetch(&run_id, &revision, &source_dir, &work_dir);
        let source_ms = elapsed_ms(stage_started);

        if let Err(e) = fetched {
            let actions = (source_action, build_action);
            return self.finish_source_failure(&run_dir, state, &revision, actions, e, started);
        }
        let source_summary = StageSummary {
            stage: SOURCE_STAGE.to_string(),
            action: source_action.name().to_string(),
            status: StageStatus::Succeeded,
            duration_ms: source_ms,
            detail: None,
        };

        // Build stage
        state.start_build(build_action.name())?;
        state.write_to_run_dir(&run_dir)?;

        let build_dir = artifact_dir(&run_dir, build_action);
        fs::create_dir_all(&build_dir)?;
        let log_path = build_dir.join(BUILD_LOG_FILE);
        let variables = self.build_variables(&revision, &work_dir);

        let stage_started = Instant::now();
        let executed = self
            .executor
            .execute(self.stack.buildspec(), &work_dir, &variables, &log_path);
        let build_ms = elapsed_ms(stage_started);

        let (build_summary, failure, phases) = match executed {
            Ok(outcome) => {
                let failure = build_failure(&outcome);
                let status = if failure.is_none() {
                    StageStatus::Succeeded
                } else {
                    StageStatus::Failed
                };
                let summary = StageSummary {
                    stage: BUILD_STAGE.to_string(),
                    action: build_action.name().to_string(),
                    status,
                    duration_ms: build_ms,
                    detail: failure.as_ref().map(|_| outcome.describe()),
                };
                (summary, failure, outcome.phases)
            }
            Err(e) => {
                tracing::error!(error = %e, "build session could not run");
                let summary = StageSummary {
                    stage: BUILD_STAGE.to_string(),
                    action: build_action.name().to_string(),
                    status: StageStatus::Failed,
                    duration_ms: build_ms,
                    detail: Some(e.to_string()),
                };
                (summary, Some(runner_failure_kind(&e)), Vec::new())
            }
        };

        let mut summary = RunSummary::from_stages(
            run_id,
            revision.commit.clone(),
            vec![source_summary, build_summary],
            failure,
            elapsed_ms(started),
        )
        .with_phases(phases);

        match failure {
            None => {
                state.succeed()?;
                match derive_image_tag(&revision.commit) {
                    Ok(tag) => {
                        let record = ImageRecord {
                            repository: self.stack.repository().to_string(),
                            tag: tag.to_string(),
                            image_uri: self.env.image_uri(self.stack.repository(), &tag),
                            source_version: revision.commit.clone(),
                        };
                        fs::write(
                            build_dir.join(IMAGE_RECORD_FILE),
                            serde_json::to_string_pretty(&record)?,
                        )?;
                        summary = summary.with_image(record.tag, record.image_uri);
                    }
                    Err(e) => {
                        // Only a custom buildspec can succeed without a tag.
                        tracing::warn!(
                            commit = %revision.commit,
                            error = %e,
                            "build succeeded but no image tag derives from the commit; {} not written",
                            IMAGE_RECORD_FILE
                        );
                    }
                }
            }
            Some(_) => {
                let reason = summary
                    .stage(BUILD_STAGE)
                    .and_then(|s| s.detail.clone())
                    .unwrap_or_else(|| "build failed".to_string());
                state.fail(reason)?;
            }
        }
        state.write_to_run_dir(&run_dir)?;
        summary.write_to_file(&run_dir.join(RUN_SUMMARY_FILE))?;

        tracing::info!(
            run_id = %summary.run_id,
            status = ?summary.status,
            exit_code = summary.exit_code,
            duration_ms = summary.duration_ms,
            "{}",
            summary.human_summary
        );
        Ok(RunReport::Completed { run_dir, summary })
    }

    fn actions(&self) -> Result<(&Action, &Action), RunError> {
        let pipeline = self.stack.pipeline();
        let source = pipeline
            .stage_action(SOURCE_STAGE)
            .ok_or_else(|| RunError::Configuration("pipeline has no source action".to_string()))?;
        let build = pipeline
            .stage_action(BUILD_STAGE)
            .ok_or_else(|| RunError::Configuration("pipeline has no build action".to_string()))?;
        Ok((source, build))
    }

    fn finish_source_failure(
        &self,
        run_dir: &Path,
        mut state: RunStateData,
        revision: &SourceRevision,
        (source_action, build_action): (&Action, &Action),
        error: SnapshotError,
        started: Instant,
    ) -> Result<RunReport, RunError> {
        tracing::error!(error = %error, "source stage failed");
        state.fail(error.to_string())?;
        state.write_to_run_dir(run_dir)?;

        let stages = vec![
            StageSummary {
                stage: SOURCE_STAGE.to_string(),
                action: source_action.name().to_string(),
                status: StageStatus::Failed,
                duration_ms: elapsed_ms(started),
                detail: Some(error.to_string()),
            },
            StageSummary::skipped(BUILD_STAGE, build_action.name()),
        ];
        let summary = RunSummary::from_stages(
            state.run_id.clone(),
            revision.commit.clone(),
            stages,
            Some(FailureKind::SourceFetch),
            elapsed_ms(started),
        );
        summary.write_to_file(&run_dir.join(RUN_SUMMARY_FILE))?;
        Ok(RunReport::Completed {
            run_dir: run_dir.to_path_buf(),
            summary,
        })
    }
}

/// `artifacts/<output artifact>/` of an action.
fn artifact_dir(run_dir: &Path, action: &Action) -> PathBuf {
    let name = action
        .outputs()
        .first()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| action.name().to_string());
    run_dir.join(ARTIFACTS_DIR).join(name)
}

fn build_failure(outcome: &BuildOutcome) -> Option<FailureKind> {
    match outcome.status {
        BuildStatus::Succeeded => None,
        BuildStatus::Failed => Some(FailureKind::BuildCommand),
        BuildStatus::TimedOut => Some(FailureKind::BuildTimeout),
    }
}

fn runner_failure_kind(error: &RunnerError) -> FailureKind {
    match error {
        RunnerError::InvalidSpec(_) => FailureKind::Configuration,
        RunnerError::SpawnFailed(_) | RunnerError::MissingWorkDir(_) | RunnerError::Io(_) => {
            FailureKind::Io
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
