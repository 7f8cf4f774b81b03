//! `synth_manifest.json`: what a synthesis produced and from which config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::{EcrCiStack, SynthError};
use crate::config::{ConfigSource, EffectiveConfig};

pub const SYNTH_MANIFEST_SCHEMA_VERSION: u32 = 1;
pub const SYNTH_MANIFEST_SCHEMA_ID: &str = "ecr-ci/synth_manifest@1";
pub const SYNTH_MANIFEST_FILE: &str = "synth_manifest.json";

/// One written output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthFile {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthManifest {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,
    pub stack_name: String,
    pub app_name: String,
    pub pipeline_name: String,

    /// Config layers that produced the stack
    pub config_sources: Vec<ConfigSource>,

    /// Redacted config key paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redactions: Vec<String>,

    /// SHA-256 of the RFC 8785 canonical template
    pub template_sha256: String,

    pub files: Vec<SynthFile>,
}

/// Digest of the canonical JSON form, stable across key order and
/// whitespace.
pub fn canonical_sha256(value: &Value) -> Result<String, SynthError> {
    let canonical = serde_json_canonicalizer::to_vec(value)
        .map_err(|e| SynthError::JcsError(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

impl SynthManifest {
    pub(super) fn new(
        stack: &EcrCiStack,
        effective: &EffectiveConfig,
        template: &Value,
    ) -> Result<Self, SynthError> {
        Ok(Self {
            schema_version: SYNTH_MANIFEST_SCHEMA_VERSION,
            schema_id: SYNTH_MANIFEST_SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            stack_name: stack.stack_name().to_string(),
            app_name: stack.app_name().to_string(),
            pipeline_name: stack.pipeline().name().to_string(),
            config_sources: effective.sources.clone(),
            redactions: effective.redactions.clone(),
            template_sha256: canonical_sha256(template)?,
            files: Vec::new(),
        })
    }

    pub(super) fn with_file(mut self, path: &str, bytes: &[u8]) -> Self {
        self.files.push(SynthFile {
            path: path.to_string(),
            size: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(bytes)),
        });
        self
    }

    pub fn file(&self, path: &str) -> Option<&SynthFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), SynthError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_digest_ignores_key_order() {
        let a = json!({"b": 1, "a": [1, 2], "c": {"y": true, "x": null}});
        let b: Value =
            serde_json::from_str(r#"{ "c": {"x": null, "y": true}, "a": [1,2], "b": 1 }"#).unwrap();
        assert_eq!(canonical_sha256(&a).unwrap(), canonical_sha256(&b).unwrap());
        assert_eq!(canonical_sha256(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_canonical_digest_sees_value_changes() {
        let a = json!({"Resources": {"A": {"Type": "AWS::S3::Bucket"}}});
        let b = json!({"Resources": {"A": {"Type": "AWS::S3::Bucket", "DeletionPolicy": "Retain"}}});
        assert_ne!(canonical_sha256(&a).unwrap(), canonical_sha256(&b).unwrap());
    }
}
