//! Seams between the local pipeline and the outside world.

use std::path::Path;

use ecr_build_runner::{BuildOutcome, BuildRunner, RunnerError};
use ecr_buildspec::{BuildSpec, EnvironmentVariable};

use crate::source::{SnapshotError, Snapshotter, SourceManifest, SourceRevision};

/// Produces the source artifact of a fired trigger.
pub trait SourceProvider {
    /// Write the artifact into `artifact_dir` and unpack it into `work_dir`.
    fn fetch(
        &self,
        run_id: &str,
        revision: &SourceRevision,
        artifact_dir: &Path,
        work_dir: &Path,
    ) -> Result<SourceManifest, SnapshotError>;
}

/// Runs the build phases against the unpacked source.
pub trait BuildExecutor {
    fn execute(
        &self,
        spec: &BuildSpec,
        work_dir: &Path,
        variables: &[EnvironmentVariable],
        log_path: &Path,
    ) -> Result<BuildOutcome, RunnerError>;
}

/// A working tree on disk standing in for the repository at the pushed
/// commit.
pub struct LocalCheckout {
    snapshotter: Snapshotter,
}

impl LocalCheckout {
    pub fn new(root: &Path) -> Result<Self, SnapshotError> {
        Ok(Self {
            snapshotter: Snapshotter::new(root)?,
        })
    }

    pub fn with_excludes(mut self, patterns: &[&str]) -> Result<Self, SnapshotError> {
        self.snapshotter = self.snapshotter.with_excludes(patterns)?;
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        self.snapshotter.root()
    }
}

impl SourceProvider for LocalCheckout {
    fn fetch(
        &self,
        run_id: &str,
        revision: &SourceRevision,
        artifact_dir: &Path,
        work_dir: &Path,
    ) -> Result<SourceManifest, SnapshotError> {
        let snapshot = self.snapshotter.create(run_id, revision)?;
        snapshot.write_to(artifact_dir)?;
        snapshot.extract_to(work_dir)?;
        tracing::info!(
            files = snapshot.manifest.file_count(),
            bytes = snapshot.size(),
            source_sha256 = %snapshot.source_sha256(),
            "source artifact written"
        );
        Ok(snapshot.manifest)
    }
}

impl BuildExecutor for BuildRunner {
    fn execute(
        &self,
        spec: &BuildSpec,
        work_dir: &Path,
        variables: &[EnvironmentVariable],
        log_path: &Path,
    ) -> Result<BuildOutcome, RunnerError> {
        self.run(spec, work_dir, variables, log_path)
    }
}
