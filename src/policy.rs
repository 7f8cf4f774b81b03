//! IAM policy statements attached to the build and pipeline roles.
//!
//! Registry access is split in two: `ecr:GetAuthorizationToken` has no
//! resource-level grain and is granted on `*`; everything that writes image
//! data is scoped to the single `<app>/rails` repository.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::intrinsic::sub;
use crate::naming::{RepositoryName, StackEnv};

/// Actions needed to push layers and manifests to one repository.
pub const REPOSITORY_PUSH_ACTIONS: &[&str] = &[
    "ecr:InitiateLayerUpload",
    "ecr:UploadLayerPart",
    "ecr:CompleteLayerUpload",
    "ecr:BatchCheckLayerAvailability",
    "ecr:PutImage",
];

/// Registry login; only grantable on `*`.
pub const REGISTRY_AUTH_ACTION: &str = "ecr:GetAuthorizationToken";

/// Artifact bucket access for both roles.
pub const ARTIFACT_BUCKET_ACTIONS: &[&str] = &[
    "s3:GetObject*",
    "s3:GetBucket*",
    "s3:List*",
    "s3:DeleteObject*",
    "s3:PutObject",
    "s3:Abort*",
];

/// Build log delivery.
pub const BUILD_LOG_ACTIONS: &[&str] = &[
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

/// What the pipeline role needs to drive the build project.
pub const START_BUILD_ACTIONS: &[&str] = &[
    "codebuild:BatchGetBuilds",
    "codebuild:StartBuild",
    "codebuild:StopBuild",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// One IAM statement. Resources may contain `${AWS::...}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

impl PolicyStatement {
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    /// True when the statement applies to every resource.
    pub fn is_unscoped(&self) -> bool {
        self.resources.iter().any(|r| r == "*")
    }

    /// Render as a template statement. Single actions and resources are
    /// emitted as scalars, several as lists.
    pub fn to_template_value(&self) -> Value {
        let actions: Vec<Value> = self.actions.iter().map(|a| json!(a)).collect();
        let resources: Vec<Value> = self.resources.iter().map(|r| sub(r)).collect();
        let effect = match self.effect {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        };
        json!({
            "Action": one_or_many(actions),
            "Effect": effect,
            "Resource": one_or_many(resources),
        })
    }
}

fn one_or_many(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

/// `arn:aws:ecr:<region>:<account>:repository/<app>/rails`
pub fn repository_arn(env: &StackEnv, repository: &RepositoryName) -> String {
    format!(
        "arn:aws:ecr:{}:{}:repository/{}",
        env.region_expr(),
        env.account_expr(),
        repository
    )
}

/// Unscoped registry login grant.
pub fn registry_auth_statement() -> PolicyStatement {
    PolicyStatement::allow([REGISTRY_AUTH_ACTION], ["*"])
}

/// Push grant scoped to one repository.
pub fn repository_push_statement(repository_arn: impl Into<String>) -> PolicyStatement {
    PolicyStatement::allow(
        REPOSITORY_PUSH_ACTIONS.iter().copied(),
        [repository_arn.into()],
    )
}

/// The two registry statements the build identity needs.
pub fn build_registry_statements(env: &StackEnv, repository: &RepositoryName) -> Vec<PolicyStatement> {
    vec![
        registry_auth_statement(),
        repository_push_statement(repository_arn(env, repository)),
    ]
}

/// Read/write on the artifact bucket and its objects. `bucket_id` is the
/// bucket's logical id.
pub fn artifact_bucket_statement(bucket_id: &str) -> PolicyStatement {
    PolicyStatement::allow(
        ARTIFACT_BUCKET_ACTIONS.iter().copied(),
        [format!("${{{}.Arn}}", bucket_id), format!("${{{}.Arn}}/*", bucket_id)],
    )
}

/// Log group and streams of the build project named by `project_id`.
pub fn build_logs_statement(env: &StackEnv, project_id: &str) -> PolicyStatement {
    let log_group = format!(
        "arn:aws:logs:{}:{}:log-group:/aws/codebuild/${{{}}}",
        env.region_expr(),
        env.account_expr(),
        project_id
    );
    PolicyStatement::allow(
        BUILD_LOG_ACTIONS.iter().copied(),
        [log_group.clone(), format!("{}:*", log_group)],
    )
}

/// Start, stop and poll builds of one project.
pub fn start_build_statement(project_id: &str) -> PolicyStatement {
    PolicyStatement::allow(
        START_BUILD_ACTIONS.iter().copied(),
        [format!("${{{}.Arn}}", project_id)],
    )
}

/// Trust policy letting a service principal assume a role.
pub fn assume_role_document(service: &str) -> Value {
    json!({
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service },
        }],
        "Version": "2012-10-17",
    })
}

/// Wrap template statements in a policy document.
pub fn policy_document(statements: Vec<Value>) -> Value {
    json!({
        "Statement": statements,
        "Version": "2012-10-17",
    })
}
