//! Logical ids from construct paths.
//!
//! `Pipeline/Role/DefaultPolicy/Resource` becomes
//! `PipelineRoleDefaultPolicy` followed by eight upper-case hex characters
//! of the SHA-256 of the path. `Default` segments are dropped from both the
//! hash input and the readable part; `Resource` only from the readable part.

use sha2::{Digest, Sha256};

const HIDDEN_ID: &str = "Default";
const HIDDEN_FROM_HUMAN_ID: &str = "Resource";
const HASH_LEN: usize = 8;
const MAX_HUMAN_LEN: usize = 240;
const MAX_ID_LEN: usize = 255;

fn remove_non_alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn path_hash(components: &[&str]) -> String {
    let digest = Sha256::digest(components.join("/").as_bytes());
    hex::encode_upper(digest)[..HASH_LEN].to_string()
}

/// Logical id for a `/`-separated construct path.
pub fn logical_id(path: &str) -> String {
    let components: Vec<&str> = path
        .split('/')
        .filter(|c| !c.is_empty() && *c != HIDDEN_ID)
        .collect();

    if let [single] = components.as_slice() {
        let candidate = remove_non_alphanumeric(single);
        if !candidate.is_empty() && candidate.len() <= MAX_ID_LEN {
            return candidate;
        }
    }

    let mut human = String::new();
    let mut previous: Option<&str> = None;
    for component in &components {
        if *component == HIDDEN_FROM_HUMAN_ID || previous == Some(component) {
            previous = Some(component);
            continue;
        }
        previous = Some(component);
        human.push_str(&remove_non_alphanumeric(component));
    }
    human.truncate(MAX_HUMAN_LEN);

    format!("{}{}", human, path_hash(&components))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_component_kept() {
        assert_eq!(logical_id("PipelineName"), "PipelineName");
        assert_eq!(logical_id("my-output"), "myoutput");
    }

    #[test]
    fn test_resource_hidden_from_human_part() {
        let id = logical_id("CodePipeline/ArtifactsBucket/Resource");
        assert!(id.starts_with("CodePipelineArtifactsBucket"));
        assert_eq!(id.len(), "CodePipelineArtifactsBucket".len() + HASH_LEN);
        let hash = &id[id.len() - HASH_LEN..];
        assert!(hash.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_resource_still_hashed() {
        assert_ne!(
            logical_id("CodePipeline/Role/Resource"),
            logical_id("CodePipeline/Role")
        );
    }

    #[test]
    fn test_default_ignored_entirely() {
        assert_eq!(
            logical_id("CodePipeline/Role/Default/Resource"),
            logical_id("CodePipeline/Role/Resource")
        );
    }

    #[test]
    fn test_deterministic_and_distinct() {
        let a = logical_id("myapp-docker-build-pipeline-project/Role/Resource");
        let b = logical_id("myapp-docker-build-pipeline-project/Role/Resource");
        let c = logical_id("other-docker-build-pipeline-project/Role/Resource");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("myappdockerbuildpipelineprojectRole"));
    }

    #[test]
    fn test_consecutive_duplicates_collapsed() {
        let id = logical_id("Source/Source/Action");
        assert!(id.starts_with("SourceAction"));
    }
}
