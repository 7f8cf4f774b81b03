//! Build outcome and the reduction from marker events to phase results.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use ecr_buildspec::{BuildSpec, Phase};

use crate::script::Marker;

/// Status of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Succeeded,
    Failed,
    /// Never entered because an earlier phase failed
    Skipped,
}

/// The command that ended a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFailure {
    /// Index of the command within its phase
    pub index: usize,

    pub command: String,

    /// Exit status; `None` when the shell was killed
    pub exit_code: Option<i32>,
}

/// Result of one declared phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub status: PhaseStatus,

    /// Commands that exited zero
    pub commands_succeeded: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<CommandFailure>,
}

/// Overall build status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Everything the runner learned about one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub status: BuildStatus,

    /// Declared phases in execution order
    pub phases: Vec<PhaseResult>,

    /// Exit status of the shell session
    pub shell_exit_code: Option<i32>,

    pub duration_ms: u64,

    /// Combined stdout/stderr of the session
    pub log_path: PathBuf,
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }

    /// The phase that failed, if any.
    pub fn failed_phase(&self) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.status == PhaseStatus::Failed)
    }

    /// One-line description for logs and summaries.
    pub fn describe(&self) -> String {
        match (self.status, self.failed_phase()) {
            (BuildStatus::Succeeded, _) => {
                format!("build succeeded ({} phases)", self.phases.len())
            }
            (BuildStatus::TimedOut, Some(phase)) => {
                format!("build timed out in phase {}", phase.phase)
            }
            (BuildStatus::TimedOut, None) => "build timed out".to_string(),
            (BuildStatus::Failed, Some(phase)) => match &phase.failure {
                Some(f) => format!(
                    "phase {} failed: command #{} `{}` exited with {}",
                    phase.phase,
                    f.index,
                    f.command,
                    f.exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "no status".to_string())
                ),
                None => format!("phase {} failed", phase.phase),
            },
            (BuildStatus::Failed, None) => "build failed".to_string(),
        }
    }
}

/// Reduce the marker stream of a finished session to phase results.
///
/// `shell_exit` is the session's exit status. A command that started but
/// never reported back (the shell exited or was killed) fails its phase with
/// that status.
pub fn reduce_markers(
    spec: &BuildSpec,
    markers: &[Marker],
    shell_exit: Option<i32>,
) -> Vec<PhaseResult> {
    spec.ordered_phases()
        .map(|(phase, body)| {
            let entered = markers.iter().any(|m| *m == Marker::Begin(phase));
            if !entered {
                return PhaseResult {
                    phase,
                    status: PhaseStatus::Skipped,
                    commands_succeeded: 0,
                    failure: None,
                };
            }

            let commands_succeeded = markers
                .iter()
                .filter(|m| matches!(m, Marker::Ok(p, _) if *p == phase))
                .count();

            let reported = markers.iter().find_map(|m| match m {
                Marker::Fail(p, index, code) if *p == phase => Some((*index, Some(*code))),
                _ => None,
            });
            let unreported = || {
                markers.iter().rev().find_map(|m| match m {
                    Marker::Start(p, index) if *p == phase && *index >= commands_succeeded => {
                        Some((*index, shell_exit))
                    }
                    _ => None,
                })
            };

            let failure = reported.or_else(unreported).or_else(|| {
                // Entered but neither finished nor started the next command
                (commands_succeeded < body.commands.len())
                    .then_some((commands_succeeded, shell_exit))
            });

            match failure {
                Some((index, exit_code)) => PhaseResult {
                    phase,
                    status: PhaseStatus::Failed,
                    commands_succeeded,
                    failure: Some(CommandFailure {
                        index,
                        command: body.commands.get(index).cloned().unwrap_or_default(),
                        exit_code,
                    }),
                },
                None => PhaseResult {
                    phase,
                    status: PhaseStatus::Succeeded,
                    commands_succeeded,
                    failure: None,
                },
            }
        })
        .collect()
}
