//! CloudFormation rendering.

use serde_json::{json, Map, Value};

use ecr_buildspec::EnvironmentVariable;

use super::logical_id::logical_id;
use super::{EcrCiStack, SynthError};
use crate::intrinsic::{get_att, reference, sub};
use crate::pipeline::{Action, ActionKind, BUILD_STAGE, SOURCE_STAGE};
use crate::policy::{
    artifact_bucket_statement, assume_role_document, build_logs_statement, policy_document,
    start_build_statement, PolicyStatement,
};
use crate::source::TriggerMode;

const PIPELINE_CONSTRUCT: &str = "CodePipeline";
const CODEBUILD_PRINCIPAL: &str = "codebuild.amazonaws.com";
const CODEPIPELINE_PRINCIPAL: &str = "codepipeline.amazonaws.com";

/// Logical ids of every resource in the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalIds {
    pub artifacts_bucket: String,
    pub pipeline_role: String,
    pub pipeline_policy: String,
    pub pipeline: String,
    pub webhook: String,
    pub project_role: String,
    pub project_policy: String,
    pub project: String,
}

impl LogicalIds {
    pub fn for_stack(stack: &EcrCiStack) -> Self {
        let project = stack.app_name().build_project_id();
        let source_action = stack.app_name().source_action_name();
        Self {
            artifacts_bucket: logical_id(&format!("{}/ArtifactsBucket/Resource", PIPELINE_CONSTRUCT)),
            pipeline_role: logical_id(&format!("{}/Role/Resource", PIPELINE_CONSTRUCT)),
            pipeline_policy: logical_id(&format!(
                "{}/Role/DefaultPolicy/Resource",
                PIPELINE_CONSTRUCT
            )),
            pipeline: logical_id(&format!("{}/Resource", PIPELINE_CONSTRUCT)),
            webhook: logical_id(&format!(
                "{}/{}/{}/WebhookResource",
                PIPELINE_CONSTRUCT, SOURCE_STAGE, source_action
            )),
            project_role: logical_id(&format!("{}/Role/Resource", project)),
            project_policy: logical_id(&format!("{}/Role/DefaultPolicy/Resource", project)),
            project: logical_id(&format!("{}/Resource", project)),
        }
    }
}

fn statements(statements: &[PolicyStatement]) -> Vec<Value> {
    statements.iter().map(|s| s.to_template_value()).collect()
}

/// Action-level variables are passed as a JSON string; pseudo parameters
/// inside it are resolved by `Fn::Sub`.
fn environment_variables_value(variables: &[EnvironmentVariable]) -> Result<Value, SynthError> {
    let text = serde_json::to_string(variables)?;
    Ok(sub(&text))
}

fn bucket_resource() -> Value {
    json!({
        "Type": "AWS::S3::Bucket",
        "UpdateReplacePolicy": "Retain",
        "DeletionPolicy": "Retain",
    })
}

fn role_resource(service: &str) -> Value {
    json!({
        "Type": "AWS::IAM::Role",
        "Properties": {
            "AssumeRolePolicyDocument": assume_role_document(service),
        },
    })
}

fn policy_resource(name: &str, role_id: &str, statements: Vec<Value>) -> Value {
    json!({
        "Type": "AWS::IAM::Policy",
        "Properties": {
            "PolicyDocument": policy_document(statements),
            "PolicyName": name,
            "Roles": [reference(role_id)],
        },
    })
}

fn project_resource(stack: &EcrCiStack, ids: &LogicalIds) -> Result<Value, SynthError> {
    let environment = stack.environment();
    Ok(json!({
        "Type": "AWS::CodeBuild::Project",
        "Properties": {
            "Artifacts": { "Type": "CODEPIPELINE" },
            "Environment": {
                "ComputeType": environment.compute_type.as_str(),
                "Image": environment.image,
                "PrivilegedMode": environment.privileged,
                "Type": "LINUX_CONTAINER",
            },
            "ServiceRole": get_att(&ids.project_role, "Arn"),
            "Source": {
                "BuildSpec": stack.buildspec().to_json_pretty()?,
                "Type": "CODEPIPELINE",
            },
            "TimeoutInMinutes": stack.config().build.timeout_minutes(),
        },
    }))
}

fn action_value(stack: &EcrCiStack, ids: &LogicalIds, action: &Action) -> Result<Value, SynthError> {
    let kind = action.kind();
    let configuration = match kind {
        ActionKind::GitHubSource => {
            let source = stack.source();
            json!({
                "Owner": source.owner,
                "Repo": source.repo,
                "Branch": source.branch,
                "OAuthToken": source.token.dynamic_reference(),
                "PollForSourceChanges": source.trigger == TriggerMode::Poll,
            })
        }
        ActionKind::CodeBuild => json!({
            "ProjectName": reference(&ids.project),
            "EnvironmentVariables": environment_variables_value(&stack.build_variables())?,
        }),
    };

    let mut value = json!({
        "ActionTypeId": {
            "Category": kind.category(),
            "Owner": kind.owner(),
            "Provider": kind.provider(),
            "Version": kind.version(),
        },
        "Configuration": configuration,
        "Name": action.name(),
        "RunOrder": action.run_order(),
    });
    if !action.inputs().is_empty() {
        value["InputArtifacts"] = action
            .inputs()
            .iter()
            .map(|a| json!({ "Name": a.as_str() }))
            .collect();
    }
    if !action.outputs().is_empty() {
        value["OutputArtifacts"] = action
            .outputs()
            .iter()
            .map(|a| json!({ "Name": a.as_str() }))
            .collect();
    }
    Ok(value)
}

fn pipeline_resource(stack: &EcrCiStack, ids: &LogicalIds) -> Result<Value, SynthError> {
    let mut stages = Vec::new();
    for stage in stack.pipeline().stages() {
        let actions = stage
            .actions()
            .iter()
            .map(|a| action_value(stack, ids, a))
            .collect::<Result<Vec<_>, _>>()?;
        stages.push(json!({ "Actions": actions, "Name": stage.name() }));
    }

    Ok(json!({
        "Type": "AWS::CodePipeline::Pipeline",
        "Properties": {
            "ArtifactStore": {
                "Location": reference(&ids.artifacts_bucket),
                "Type": "S3",
            },
            "Name": stack.pipeline().name(),
            "RoleArn": get_att(&ids.pipeline_role, "Arn"),
            "Stages": stages,
        },
        "DependsOn": [ids.pipeline_policy, ids.pipeline_role],
    }))
}

fn webhook_resource(stack: &EcrCiStack, ids: &LogicalIds) -> Value {
    let source = stack.source();
    let target_action = stack
        .pipeline()
        .stage_action(SOURCE_STAGE)
        .map(|a| a.name().to_string())
        .unwrap_or_else(|| stack.app_name().source_action_name());
    json!({
        "Type": "AWS::CodePipeline::Webhook",
        "Properties": {
            "Authentication": "GITHUB_HMAC",
            "AuthenticationConfiguration": {
                "SecretToken": source.token.dynamic_reference(),
            },
            "Filters": [{
                "JsonPath": "$.ref",
                "MatchEquals": "refs/heads/{Branch}",
            }],
            "RegisterWithThirdParty": true,
            "TargetAction": target_action,
            "TargetPipeline": reference(&ids.pipeline),
            "TargetPipelineVersion": 1,
        },
    })
}

/// Render the whole template.
pub(super) fn render(stack: &EcrCiStack) -> Result<Value, SynthError> {
    let ids = LogicalIds::for_stack(stack);
    let env = stack.env();

    let mut project_statements = vec![
        build_logs_statement(env, &ids.project),
        artifact_bucket_statement(&ids.artifacts_bucket),
    ];
    project_statements.extend(stack.registry_statements());

    let pipeline_statements = vec![
        artifact_bucket_statement(&ids.artifacts_bucket),
        start_build_statement(&ids.project),
    ];

    let mut resources = Map::new();
    resources.insert(ids.artifacts_bucket.clone(), bucket_resource());
    resources.insert(ids.project_role.clone(), role_resource(CODEBUILD_PRINCIPAL));
    resources.insert(
        ids.project_policy.clone(),
        policy_resource(&ids.project_policy, &ids.project_role, statements(&project_statements)),
    );
    resources.insert(ids.project.clone(), project_resource(stack, &ids)?);
    resources.insert(ids.pipeline_role.clone(), role_resource(CODEPIPELINE_PRINCIPAL));
    resources.insert(
        ids.pipeline_policy.clone(),
        policy_resource(&ids.pipeline_policy, &ids.pipeline_role, statements(&pipeline_statements)),
    );
    resources.insert(ids.pipeline.clone(), pipeline_resource(stack, &ids)?);
    if stack.source().trigger == TriggerMode::Webhook {
        resources.insert(ids.webhook.clone(), webhook_resource(stack, &ids));
    }

    let build_stage_action = stack
        .pipeline()
        .stage_action(BUILD_STAGE)
        .map(|a| a.name().to_string());
    tracing::debug!(
        resources = resources.len(),
        build_action = ?build_stage_action,
        "rendered template"
    );

    Ok(json!({
        "Description": format!("CI pipeline building the {} image", stack.repository()),
        "Resources": resources,
        "Outputs": {
            "PipelineName": {
                "Value": reference(&ids.pipeline),
            },
            "ImageRepositoryUri": {
                "Value": sub(&stack.repository_uri()),
            },
        },
    }))
}
