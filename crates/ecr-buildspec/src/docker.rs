//! The container image buildspec: log in to the registry, build, tag, push.

use crate::environment::{ACCOUNT_ID_VAR, IMAGE_REPO_NAME_VAR, REGION_VAR, SOURCE_VERSION_VAR};
use crate::spec::BuildSpec;
use crate::Phase;

/// Number of leading source-version characters used as the image tag.
pub const IMAGE_TAG_LENGTH: usize = 7;

/// Shell expression for the full registry image reference.
pub fn registry_image_expr() -> String {
    format!(
        "${ACCOUNT_ID_VAR}.dkr.ecr.${REGION_VAR}.amazonaws.com/${IMAGE_REPO_NAME_VAR}:$IMAGE_TAG"
    )
}

/// Commands deriving `IMAGE_TAG` from the resolved source version.
///
/// The second command fails when the version is shorter than
/// [`IMAGE_TAG_LENGTH`], so a truncated tag never reaches the registry.
pub fn image_tag_commands() -> Vec<String> {
    vec![
        format!("IMAGE_TAG=$(echo ${SOURCE_VERSION_VAR} | cut -c 1-{IMAGE_TAG_LENGTH})"),
        format!(
            "[ ${{#IMAGE_TAG}} -eq {IMAGE_TAG_LENGTH} ] || {{ echo \"resolved source version is shorter than {IMAGE_TAG_LENGTH} characters\" >&2; false; }}"
        ),
    ]
}

/// Buildspec that builds the checkout's Dockerfile and pushes the image.
pub fn docker_image_buildspec(docker_runtime: u32) -> BuildSpec {
    let image = registry_image_expr();

    let mut pre_build = vec![
        "echo Logging in to Amazon ECR...".to_string(),
        format!("$(aws ecr get-login --no-include-email --region ${REGION_VAR})"),
    ];
    pre_build.extend(image_tag_commands());

    BuildSpec::new()
        .with_runtime("docker", docker_runtime)
        .with_commands(Phase::PreBuild, pre_build)
        .with_commands(
            Phase::Build,
            [
                "echo Building the Docker image...".to_string(),
                format!("docker build -t ${IMAGE_REPO_NAME_VAR}:$IMAGE_TAG ."),
            ],
        )
        .with_commands(
            Phase::PostBuild,
            [
                format!("docker tag ${IMAGE_REPO_NAME_VAR}:$IMAGE_TAG {image}"),
                format!("docker push {image}"),
            ],
        )
}
