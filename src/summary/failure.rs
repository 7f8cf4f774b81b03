//! Failure taxonomy and stable exit codes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed)
    }
}

/// Cause of a failed command or run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Invalid or incomplete configuration
    Configuration,
    /// Missing or unusable source token; raised before a run exists
    TriggerAuthentication,
    /// Snapshot or extraction of the source failed
    SourceFetch,
    /// A build command exited non-zero
    BuildCommand,
    /// The build exceeded its timeout
    BuildTimeout,
    /// Template or manifest generation failed
    Synthesis,
    /// Local filesystem error outside a stage
    Io,
}

impl FailureKind {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Configuration => ExitCode::Configuration,
            FailureKind::TriggerAuthentication => ExitCode::TriggerAuthentication,
            FailureKind::SourceFetch => ExitCode::SourceFetch,
            FailureKind::BuildCommand => ExitCode::BuildCommand,
            FailureKind::BuildTimeout => ExitCode::BuildTimeout,
            FailureKind::Synthesis => ExitCode::Synthesis,
            FailureKind::Io => ExitCode::Io,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "Configuration invalid",
            FailureKind::TriggerAuthentication => "Source authentication failed",
            FailureKind::SourceFetch => "Source stage failed",
            FailureKind::BuildCommand => "Build command failed",
            FailureKind::BuildTimeout => "Build timed out",
            FailureKind::Synthesis => "Synthesis failed",
            FailureKind::Io => "I/O error",
        }
    }
}

/// Stable process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    #[default]
    Success = 0,
    Configuration = 10,
    TriggerAuthentication = 20,
    SourceFetch = 30,
    BuildCommand = 40,
    BuildTimeout = 41,
    Synthesis = 50,
    Io = 60,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            10 => Some(ExitCode::Configuration),
            20 => Some(ExitCode::TriggerAuthentication),
            30 => Some(ExitCode::SourceFetch),
            40 => Some(ExitCode::BuildCommand),
            41 => Some(ExitCode::BuildTimeout),
            50 => Some(ExitCode::Synthesis),
            60 => Some(ExitCode::Io),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_stable() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(FailureKind::Configuration.exit_code().as_i32(), 10);
        assert_eq!(FailureKind::TriggerAuthentication.exit_code().as_i32(), 20);
        assert_eq!(FailureKind::SourceFetch.exit_code().as_i32(), 30);
        assert_eq!(FailureKind::BuildCommand.exit_code().as_i32(), 40);
        assert_eq!(FailureKind::BuildTimeout.exit_code().as_i32(), 41);
        assert_eq!(FailureKind::Synthesis.exit_code().as_i32(), 50);
        assert_eq!(FailureKind::Io.exit_code().as_i32(), 60);
    }

    #[test]
    fn test_from_i32_inverts_as_i32() {
        for code in [0, 10, 20, 30, 40, 41, 50, 60] {
            assert_eq!(ExitCode::from_i32(code).unwrap().as_i32(), code);
        }
        assert_eq!(ExitCode::from_i32(1), None);
    }

    #[test]
    fn test_serialization() {
        assert_eq!(
            serde_json::to_string(&FailureKind::TriggerAuthentication).unwrap(),
            "\"TRIGGER_AUTHENTICATION\""
        );
        assert_eq!(serde_json::to_string(&Status::Failed).unwrap(), "\"failed\"");
    }
}
