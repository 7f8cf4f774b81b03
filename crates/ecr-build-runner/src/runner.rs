//! Local build runner.
//!
//! Spawns one shell session for the whole buildspec, streams its output to a
//! log file and reduces the marker lines into per-phase results.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use ecr_buildspec::{BuildSpec, BuildSpecError, EnvironmentVariable};

use crate::outcome::{reduce_markers, BuildOutcome, BuildStatus};
use crate::script::{render_script, split_marker, Marker};

/// Variables copied from the runner's own environment into the session.
pub const ENV_ALLOWLIST: &[&str] = &[
    "HOME",
    "PATH",
    "TMPDIR",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "TERM",
    "USER",
    "LOGNAME",
    "DOCKER_HOST",
    "DOCKER_CONFIG",
    "AWS_PROFILE",
    "AWS_CONFIG_FILE",
    "AWS_SHARED_CREDENTIALS_FILE",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
];

/// Errors from running a build.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid buildspec: {0}")]
    InvalidSpec(#[from] BuildSpecError),

    #[error("shell failed to start: {0}")]
    SpawnFailed(String),

    #[error("working directory does not exist: {0}")]
    MissingWorkDir(PathBuf),
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// POSIX shell used for the session
    pub shell: PathBuf,

    /// Wall-clock limit for the whole build
    pub timeout: Duration,

    /// How often the child is polled for exit
    pub poll_interval: Duration,

    /// Time between SIGTERM and SIGKILL when a timed-out session is stopped
    pub termination_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(50),
            termination_grace: Duration::from_secs(5),
        }
    }
}

/// Runs buildspecs against a local working directory.
#[derive(Debug, Clone, Default)]
pub struct BuildRunner {
    config: RunnerConfig,
}

impl BuildRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Build the child environment: allowlisted host variables, then the
    /// injected build variables, which win on conflict.
    pub fn session_env(&self, variables: &[EnvironmentVariable]) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = ENV_ALLOWLIST
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();

        for var in variables {
            env.insert(var.name.clone(), var.value.clone());
        }
        env
    }

    /// Run every phase of `spec` in `work_dir`, writing output to `log_path`.
    ///
    /// A failing command is not an error here: it is reported in the
    /// returned outcome. Errors mean the session could not run at all.
    pub fn run(
        &self,
        spec: &BuildSpec,
        work_dir: &Path,
        variables: &[EnvironmentVariable],
        log_path: &Path,
    ) -> Result<BuildOutcome, RunnerError> {
        spec.validate()?;
        if !work_dir.is_dir() {
            return Err(RunnerError::MissingWorkDir(work_dir.to_path_buf()));
        }

        for (name, version) in spec
            .phase(ecr_buildspec::Phase::Install)
            .map(|body| body.runtime_versions.iter())
            .into_iter()
            .flatten()
        {
            info!(runtime = %name, version = ?version, "runtime version is provided by the build image, not installed locally");
        }

        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log_file = Arc::new(Mutex::new(File::create(log_path)?));

        let env = self.session_env(variables);
        let script = render_script(spec);
        let start = Instant::now();

        let mut command = Command::new(&self.config.shell);
        command
            .arg("-c")
            .arg(&script)
            .current_dir(work_dir)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // The session leads its own process group so a timeout reaches
        // every command it started, not just the shell.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| RunnerError::SpawnFailed(e.to_string()))?;

        info!(
            work_dir = %work_dir.display(),
            commands = spec.command_count(),
            "build session started"
        );

        let stdout_handle = spawn_stdout_reader(&mut child, Arc::clone(&log_file));
        let stderr_handle = spawn_stderr_reader(&mut child, Arc::clone(&log_file));

        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= self.config.timeout {
                warn!(timeout_secs = self.config.timeout.as_secs(), "build timed out, killing session");
                timed_out = true;
                break self.terminate_session(&mut child)?;
            }
            std::thread::sleep(self.config.poll_interval);
        };

        let markers = stdout_handle.join().unwrap_or_default();
        let _ = stderr_handle.join();

        let shell_exit_code = status.code();
        let phases = reduce_markers(spec, &markers, shell_exit_code);
        let all_succeeded = phases
            .iter()
            .all(|p| p.status == crate::PhaseStatus::Succeeded);

        let status = if timed_out {
            BuildStatus::TimedOut
        } else if status.success() && all_succeeded {
            BuildStatus::Succeeded
        } else {
            BuildStatus::Failed
        };

        let outcome = BuildOutcome {
            status,
            phases,
            shell_exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            log_path: log_path.to_path_buf(),
        };

        if outcome.succeeded() {
            info!(duration_ms = outcome.duration_ms, "{}", outcome.describe());
        } else {
            warn!(duration_ms = outcome.duration_ms, "{}", outcome.describe());
        }

        Ok(outcome)
    }

    /// Stop the session's whole process group: SIGTERM, then SIGKILL once
    /// the grace period runs out.
    fn terminate_session(&self, child: &mut Child) -> io::Result<ExitStatus> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let group = Pid::from_raw(child.id() as i32);
            let _ = killpg(group, Signal::SIGTERM);

            let start = Instant::now();
            while start.elapsed() < self.config.termination_grace {
                if let Some(status) = child.try_wait()? {
                    // Commands may ignore SIGTERM after the shell is gone.
                    let _ = killpg(group, Signal::SIGKILL);
                    return Ok(status);
                }
                std::thread::sleep(self.config.poll_interval);
            }

            debug!("grace period elapsed, sending SIGKILL to session");
            let _ = killpg(group, Signal::SIGKILL);
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }

        child.wait()
    }
}

fn write_log_line(log: &Mutex<File>, line: &str) {
    if let Ok(mut f) = log.lock() {
        let _ = writeln!(f, "{}", line);
    }
}

/// Read stdout, log command output, and collect markers.
fn spawn_stdout_reader(child: &mut Child, log: Arc<Mutex<File>>) -> JoinHandle<Vec<Marker>> {
    let stdout = child.stdout.take();
    std::thread::spawn(move || {
        let mut markers = Vec::new();
        let Some(stdout) = stdout else {
            return markers;
        };

        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            let (output, marker) = split_marker(&line);
            if !output.is_empty() || marker.is_none() {
                debug!(target: "ecr_build_runner::output", "{}", output);
                write_log_line(&log, output);
            }
            if let Some(marker) = marker {
                match marker {
                    Marker::Begin(phase) => {
                        info!(%phase, "entering phase");
                        write_log_line(&log, &format!("[phase] {}", phase));
                    }
                    Marker::Fail(phase, index, code) => {
                        warn!(%phase, index, exit_code = code, "command failed");
                    }
                    Marker::Start(phase, index) => debug!(%phase, index, "running command"),
                    Marker::Ok(_, _) => {}
                }
                markers.push(marker);
            }
        }
        markers
    })
}

fn spawn_stderr_reader(child: &mut Child, log: Arc<Mutex<File>>) -> JoinHandle<()> {
    let stderr = child.stderr.take();
    std::thread::spawn(move || {
        if let Some(stderr) = stderr {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                debug!(target: "ecr_build_runner::output", "[stderr] {}", line);
                write_log_line(&log, &format!("[stderr] {}", line));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PhaseStatus;
    use ecr_buildspec::Phase;
    use tempfile::TempDir;

    fn run(spec: &BuildSpec, vars: &[EnvironmentVariable]) -> (BuildOutcome, TempDir) {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("logs/build.log");
        let outcome = BuildRunner::default()
            .run(spec, dir.path(), vars, &log)
            .unwrap();
        (outcome, dir)
    }

    #[test]
    fn test_successful_build() {
        let spec = BuildSpec::new()
            .with_runtime("docker", 18)
            .with_commands(Phase::Build, ["echo hello"]);
        let (outcome, _dir) = run(&spec, &[]);

        assert!(outcome.succeeded());
        assert_eq!(outcome.phases.len(), 2);
        let log = fs::read_to_string(&outcome.log_path).unwrap();
        assert!(log.contains("hello"));
        assert!(!log.contains("@@ecr-ci"));
    }

    #[test]
    fn test_first_failure_halts() {
        let spec = BuildSpec::new()
            .with_commands(Phase::PreBuild, ["true", "exit_code() { return 3; }; exit_code", "touch never"])
            .with_commands(Phase::Build, ["touch nor-this"]);
        let (outcome, dir) = run(&spec, &[]);

        assert_eq!(outcome.status, BuildStatus::Failed);
        let pre = &outcome.phases[0];
        assert_eq!(pre.status, PhaseStatus::Failed);
        assert_eq!(pre.commands_succeeded, 1);
        assert_eq!(pre.failure.as_ref().unwrap().index, 1);
        assert_eq!(pre.failure.as_ref().unwrap().exit_code, Some(3));
        assert_eq!(outcome.phases[1].status, PhaseStatus::Skipped);
        assert!(!dir.path().join("never").exists());
        assert!(!dir.path().join("nor-this").exists());
    }

    #[test]
    fn test_shell_state_spans_phases() {
        let spec = BuildSpec::new()
            .with_commands(Phase::PreBuild, ["TAG=$(echo abcdef1234567 | cut -c 1-7)"])
            .with_commands(Phase::Build, ["[ \"$TAG\" = abcdef1 ]"]);
        let (outcome, _dir) = run(&spec, &[]);
        assert!(outcome.succeeded(), "{}", outcome.describe());
    }

    #[test]
    fn test_injected_variables_visible() {
        let spec = BuildSpec::new()
            .with_commands(Phase::Build, ["[ \"$IMAGE_REPO_NAME\" = myapp/rails ]"]);
        let vars = [EnvironmentVariable::plaintext("IMAGE_REPO_NAME", "myapp/rails")];
        let (outcome, _dir) = run(&spec, &vars);
        assert!(outcome.succeeded());
    }

    #[test]
    fn test_stderr_captured() {
        let spec = BuildSpec::new().with_commands(Phase::Build, ["echo oops >&2"]);
        let (outcome, _dir) = run(&spec, &[]);
        let log = fs::read_to_string(&outcome.log_path).unwrap();
        assert!(log.contains("[stderr] oops"));
    }

    #[test]
    fn test_exit_inside_command_fails_phase() {
        let spec = BuildSpec::new()
            .with_commands(Phase::Build, ["exit 4"])
            .with_commands(Phase::PostBuild, ["true"]);
        let (outcome, _dir) = run(&spec, &[]);

        assert_eq!(outcome.status, BuildStatus::Failed);
        assert_eq!(outcome.phases[0].failure.as_ref().unwrap().exit_code, Some(4));
        assert_eq!(outcome.phases[1].status, PhaseStatus::Skipped);
    }

    #[test]
    fn test_timeout_kills_session() {
        let spec = BuildSpec::new().with_commands(Phase::Build, ["while :; do :; done"]);
        let dir = TempDir::new().unwrap();
        let runner = BuildRunner::new(RunnerConfig {
            timeout: Duration::from_millis(200),
            ..RunnerConfig::default()
        });
        let outcome = runner
            .run(&spec, dir.path(), &[], &dir.path().join("build.log"))
            .unwrap();
        assert_eq!(outcome.status, BuildStatus::TimedOut);
    }

    #[test]
    fn test_timeout_stops_external_commands() {
        let spec = BuildSpec::new()
            .with_commands(Phase::Build, ["sleep 30"])
            .with_commands(Phase::PostBuild, ["touch after-sleep"]);
        let dir = TempDir::new().unwrap();
        let runner = BuildRunner::new(RunnerConfig {
            timeout: Duration::from_millis(200),
            termination_grace: Duration::from_millis(500),
            ..RunnerConfig::default()
        });

        let start = Instant::now();
        let outcome = runner
            .run(&spec, dir.path(), &[], &dir.path().join("build.log"))
            .unwrap();

        assert_eq!(outcome.status, BuildStatus::TimedOut);
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timeout of 200ms took {:?}",
            start.elapsed()
        );
        assert!(!dir.path().join("after-sleep").exists());
    }

    #[test]
    fn test_timeout_kills_commands_ignoring_sigterm() {
        let spec = BuildSpec::new().with_commands(Phase::Build, ["trap '' TERM; sleep 30"]);
        let dir = TempDir::new().unwrap();
        let runner = BuildRunner::new(RunnerConfig {
            timeout: Duration::from_millis(200),
            termination_grace: Duration::from_millis(300),
            ..RunnerConfig::default()
        });

        let start = Instant::now();
        let outcome = runner
            .run(&spec, dir.path(), &[], &dir.path().join("build.log"))
            .unwrap();

        assert_eq!(outcome.status, BuildStatus::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_work_dir() {
        let dir = TempDir::new().unwrap();
        let spec = BuildSpec::new().with_commands(Phase::Build, ["true"]);
        let result = BuildRunner::default().run(
            &spec,
            &dir.path().join("absent"),
            &[],
            &dir.path().join("build.log"),
        );
        assert!(matches!(result, Err(RunnerError::MissingWorkDir(_))));
    }

    #[test]
    fn test_session_env_overrides_host() {
        let runner = BuildRunner::default();
        let env = runner.session_env(&[EnvironmentVariable::plaintext("PATH", "/custom")]);
        assert_eq!(env.get("PATH").map(String::as_str), Some("/custom"));
    }
}
