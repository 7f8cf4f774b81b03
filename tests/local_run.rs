//! End-to-end local runs: trigger, source snapshot, build session.

use std::fs;
use std::path::Path;

use ecr_build_runner::BuildRunner;
use ecr_ci_pipeline::config::{cli_overrides, CliOverrides, EffectiveConfig};
use ecr_ci_pipeline::run::{LocalCheckout, LocalPipeline, RunReport, IMAGE_RECORD_FILE};
use ecr_ci_pipeline::source::SourceManifest;
use ecr_ci_pipeline::state::{PipelineState, RunStateData, RUN_STATE_FILE};
use ecr_ci_pipeline::summary::{ExitCode, FailureKind, StageStatus, RUN_SUMMARY_FILE};
use ecr_ci_pipeline::{EcrCiStack, PushEvent};
use tempfile::TempDir;

const COMMIT: &str = "abcdef1234567890abcdef1234567890abcdef12";

const PASSING_BUILDSPEC: &str = r#"version: "0.2"
phases:
  pre_build:
    commands:
      - IMAGE_TAG=$(echo $CODEBUILD_RESOLVED_SOURCE_VERSION | cut -c 1-7)
  build:
    commands:
      - test -f Dockerfile
      - echo "built $IMAGE_REPO_NAME:$IMAGE_TAG for $AWS_ACCOUNT_ID in $AWS_REGION"
"#;

const FAILING_BUILDSPEC: &str = r#"version: "0.2"
phases:
  build:
    commands:
      - echo before
      - "false"
  post_build:
    commands:
      - echo pushed
"#;

struct Fixture {
    _root: TempDir,
    checkout: std::path::PathBuf,
    runs: std::path::PathBuf,
    buildspec: std::path::PathBuf,
}

fn fixture(buildspec: &str) -> Fixture {
    let root = TempDir::new().unwrap();
    let checkout = root.path().join("checkout");
    fs::create_dir_all(checkout.join("app")).unwrap();
    fs::write(checkout.join("Dockerfile"), "FROM ruby:2.6\n").unwrap();
    fs::write(checkout.join("app/main.rb"), "puts 'hi'\n").unwrap();
    fs::create_dir_all(checkout.join("node_modules/pkg")).unwrap();
    fs::write(checkout.join("node_modules/pkg/index.js"), "x").unwrap();

    let spec_path = root.path().join("buildspec.yml");
    fs::write(&spec_path, buildspec).unwrap();

    Fixture {
        runs: root.path().join("runs"),
        checkout,
        buildspec: spec_path,
        _root: root,
    }
}

fn pipeline(fx: &Fixture) -> LocalPipeline<LocalCheckout, BuildRunner> {
    let overrides = CliOverrides {
        app_name: Some("myapp".to_string()),
        context: vec![format!("build.buildspec_file={}", fx.buildspec.display())],
        account: Some("123456789012".to_string()),
        region: Some("ap-northeast-1".to_string()),
    };
    let effective = EffectiveConfig::build(None, None, cli_overrides(&overrides).unwrap()).unwrap();
    let stack = EcrCiStack::from_config(effective.stack_config().unwrap(), Path::new(".")).unwrap();

    LocalPipeline::new(
        stack,
        LocalCheckout::new(&fx.checkout).unwrap(),
        BuildRunner::default(),
        |key| (key == "GITHUB_TOKEN").then(|| "ghp_localtesttoken".to_string()),
    )
    .unwrap()
    .with_runs_dir(&fx.runs)
    .with_effective_config(effective)
}

fn push(branch: &str) -> PushEvent {
    PushEvent::from_json(&format!(
        r#"{{"ref": "refs/heads/{}", "after": "{}",
            "repository": {{"name": "rails_ecs-rails_app", "owner": {{"login": "youn410"}}}}}}"#,
        branch, COMMIT
    ))
    .unwrap()
}

#[test]
fn test_successful_run_records_artifacts() {
    let fx = fixture(PASSING_BUILDSPEC);
    let report = pipeline(&fx).execute(&push("master")).unwrap();
    assert_eq!(report.exit_code(), ExitCode::Success);

    let RunReport::Completed { run_dir, summary } = report else {
        panic!("expected a completed run");
    };
    assert!(run_dir.starts_with(&fx.runs));
    assert_eq!(summary.source_version, COMMIT);
    assert_eq!(summary.image_tag.as_deref(), Some("abcdef1"));
    assert_eq!(
        summary.image_uri.as_deref(),
        Some("123456789012.dkr.ecr.ap-northeast-1.amazonaws.com/myapp/rails:abcdef1")
    );

    let state = RunStateData::from_file(&run_dir.join(RUN_STATE_FILE)).unwrap();
    assert_eq!(state.state, PipelineState::Succeeded);
    assert!(run_dir.join(RUN_SUMMARY_FILE).exists());
    assert!(run_dir.join("effective_config.json").exists());

    let source_artifact = run_dir.join("artifacts/Artifact_Source_myapp-GitHub-source-action");
    assert!(source_artifact.join("source.tar").exists());
    let manifest = SourceManifest::from_json(
        &fs::read_to_string(source_artifact.join("source_manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest.revision.commit, COMMIT);
    assert!(manifest.entries.iter().any(|e| e.path == "Dockerfile"));
    assert!(!manifest.entries.iter().any(|e| e.path.starts_with("node_modules")));

    let build_artifact = run_dir.join("artifacts/Artifact_Build_myapp-docker-build-action");
    let log = fs::read_to_string(build_artifact.join("build.log")).unwrap();
    assert!(log.contains("built myapp/rails:abcdef1 for 123456789012 in ap-northeast-1"));
    assert!(build_artifact.join(IMAGE_RECORD_FILE).exists());
}

#[test]
fn test_failing_build_fails_run() {
    let fx = fixture(FAILING_BUILDSPEC);
    let report = pipeline(&fx).execute(&push("master")).unwrap();
    assert_eq!(report.exit_code(), ExitCode::BuildCommand);

    let RunReport::Completed { run_dir, summary } = report else {
        panic!("expected a completed run");
    };
    assert_eq!(summary.failure_kind, Some(FailureKind::BuildCommand));
    assert_eq!(summary.stage("Source").unwrap().status, StageStatus::Succeeded);
    assert_eq!(summary.stage("Build").unwrap().status, StageStatus::Failed);
    assert!(summary.image_uri.is_none());

    let state = RunStateData::from_file(&run_dir.join(RUN_STATE_FILE)).unwrap();
    assert_eq!(state.state, PipelineState::Failed);
    assert!(state.failure_reason.unwrap().contains("false"));

    let log = fs::read_to_string(
        run_dir.join("artifacts/Artifact_Build_myapp-docker-build-action/build.log"),
    )
    .unwrap();
    assert!(log.contains("before"));
    assert!(!log.contains("pushed"));
}

#[test]
fn test_ignored_push_creates_no_run() {
    let fx = fixture(PASSING_BUILDSPEC);
    let report = pipeline(&fx).execute(&push("feature/x")).unwrap();
    assert!(matches!(report, RunReport::Ignored(_)));
    assert_eq!(report.exit_code(), ExitCode::Success);
    assert!(!fx.runs.exists());
}

#[test]
fn test_short_commit_fails_with_generated_tag_commands() {
    let fx = fixture(
        "version: \"0.2\"\nphases:\n  pre_build:\n    commands:\n      - IMAGE_TAG=$(echo $CODEBUILD_RESOLVED_SOURCE_VERSION | cut -c 1-7)\n      - \"[ ${#IMAGE_TAG} -eq 7 ]\"\n  build:\n    commands:\n      - echo tagged\n",
    );
    let event = PushEvent::from_json(
        r#"{"ref": "refs/heads/master", "after": "abc12",
            "repository": {"full_name": "youn410/rails_ecs-rails_app"}}"#,
    )
    .unwrap();
    let report = pipeline(&fx).execute(&event).unwrap();
    assert_eq!(report.exit_code(), ExitCode::BuildCommand);
    let summary = report.summary().unwrap();
    assert!(summary.image_tag.is_none());
}
