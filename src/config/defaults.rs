//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Values every stack starts from. The app name has no default and must
/// come from a later layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    pub stack_name: String,
    pub pipeline_name: String,

    pub source_owner: String,
    pub source_repo: String,
    pub source_branch: String,
    /// webhook, poll or none
    pub source_trigger: String,
    pub token_secret_name: String,
    pub token_env: String,

    pub build_image: String,
    pub build_compute_type: String,
    pub build_privileged: bool,
    pub docker_runtime: u32,
    /// Build timeout in seconds (default: 3600, the managed service default)
    pub build_timeout_seconds: u64,

    pub runs_dir: String,
    pub shell: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            stack_name: "EcrCiPipelineStack".to_string(),
            pipeline_name: "ecr-ci-pipeline".to_string(),
            source_owner: "youn410".to_string(),
            source_repo: "rails_ecs-rails_app".to_string(),
            source_branch: "master".to_string(),
            source_trigger: "webhook".to_string(),
            token_secret_name: "github-oauth-token".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            build_image: "aws/codebuild/standard:2.0".to_string(),
            build_compute_type: "BUILD_GENERAL1_SMALL".to_string(),
            build_privileged: true,
            docker_runtime: 18,
            build_timeout_seconds: 3600,
            runs_dir: ".ecr-ci/runs".to_string(),
            shell: "/bin/sh".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Nested JSON layer in the same shape as the TOML files.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "stack_name": self.stack_name,
            "pipeline_name": self.pipeline_name,
            "source": {
                "owner": self.source_owner,
                "repo": self.source_repo,
                "branch": self.source_branch,
                "trigger": self.source_trigger,
                "token_secret_name": self.token_secret_name,
                "token_env": self.token_env
            },
            "build": {
                "image": self.build_image,
                "compute_type": self.build_compute_type,
                "privileged": self.build_privileged,
                "docker_runtime": self.docker_runtime,
                "timeout_seconds": self.build_timeout_seconds
            },
            "run": {
                "runs_dir": self.runs_dir,
                "shell": self.shell
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.stack_name, "EcrCiPipelineStack");
        assert_eq!(defaults.source_branch, "master");
        assert_eq!(defaults.build_image, "aws/codebuild/standard:2.0");
        assert!(defaults.build_privileged);
        assert_eq!(defaults.build_timeout_seconds, 3600);
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();

        assert_eq!(value["source"]["owner"], "youn410");
        assert_eq!(value["source"]["repo"], "rails_ecs-rails_app");
        assert_eq!(value["source"]["trigger"], "webhook");
        assert_eq!(value["build"]["docker_runtime"], 18);
        assert_eq!(value["run"]["runs_dir"], ".ecr-ci/runs");
        assert!(value.get("app_name").is_none());
    }
}
