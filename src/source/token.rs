//! Source host access token, handled by reference only.

use serde::{Deserialize, Serialize};

use super::TriggerError;

/// Placeholder text that must never be accepted as a real token.
const PLACEHOLDER_TOKENS: &[&str] = &["oauth token", "changeme", "<token>"];

/// Where the token lives.
///
/// Synthesis renders a dynamic reference to the secret store; local runs
/// read the environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    /// Secrets Manager secret id
    pub secret_name: String,

    /// JSON key inside the secret, when the secret is a JSON object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_field: Option<String>,

    /// Environment variable consulted by local runs
    pub env_var: String,
}

impl TokenRef {
    /// CloudFormation dynamic reference resolved at deploy time.
    pub fn dynamic_reference(&self) -> String {
        match &self.secret_field {
            Some(field) => format!(
                "{{{{resolve:secretsmanager:{}:SecretString:{}}}}}",
                self.secret_name, field
            ),
            None => format!("{{{{resolve:secretsmanager:{}:SecretString}}}}", self.secret_name),
        }
    }

    /// Check that the token is available through `lookup` (normally
    /// `std::env::var`). The value itself is not kept: local sources read
    /// the checkout directly.
    pub fn check<F>(&self, lookup: F) -> Result<(), TriggerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = lookup(&self.env_var).ok_or_else(|| TriggerError::Authentication {
            reason: format!("{} is not set", self.env_var),
        })?;
        check_token(&value).map_err(|reason| TriggerError::Authentication {
            reason: format!("{}: {}", self.env_var, reason),
        })
    }
}

fn check_token(value: &str) -> Result<(), &'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("token is empty");
    }
    if PLACEHOLDER_TOKENS
        .iter()
        .any(|p| trimmed.eq_ignore_ascii_case(p))
    {
        return Err("token is a placeholder");
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err("token contains whitespace");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_ref() -> TokenRef {
        TokenRef {
            secret_name: "github-oauth-token".to_string(),
            secret_field: None,
            env_var: "GITHUB_TOKEN".to_string(),
        }
    }

    #[test]
    fn test_dynamic_reference() {
        assert_eq!(
            token_ref().dynamic_reference(),
            "{{resolve:secretsmanager:github-oauth-token:SecretString}}"
        );

        let mut with_field = token_ref();
        with_field.secret_field = Some("token".to_string());
        assert_eq!(
            with_field.dynamic_reference(),
            "{{resolve:secretsmanager:github-oauth-token:SecretString:token}}"
        );
    }

    #[test]
    fn test_check_ok() {
        assert!(token_ref()
            .check(|_| Some("ghp_abcdefghijklmnop".to_string()))
            .is_ok());
    }

    #[test]
    fn test_check_missing_is_authentication_error() {
        let err = token_ref().check(|_| None).unwrap_err();
        assert!(matches!(err, TriggerError::Authentication { .. }));
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }

    #[test]
    fn test_check_rejects_empty_and_whitespace() {
        assert!(token_ref().check(|_| Some("   ".to_string())).is_err());
        let err = token_ref().check(|_| Some("two words".to_string())).unwrap_err();
        assert!(err.to_string().contains("whitespace"));
    }

    #[test]
    fn test_placeholder_reported_before_whitespace() {
        for placeholder in ["oauth token", "OAuth Token", "changeme", "<token>"] {
            let err = token_ref()
                .check(|_| Some(placeholder.to_string()))
                .unwrap_err();
            assert!(err.to_string().contains("placeholder"), "{}: {}", placeholder, err);
        }
    }

    #[test]
    fn test_error_never_contains_value() {
        let err = token_ref()
            .check(|_| Some("ghp secretvalue".to_string()))
            .unwrap_err();
        assert!(!err.to_string().contains("secretvalue"));
    }
}
