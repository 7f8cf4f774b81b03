//! CLI layer (layer 4)
//!
//! `--context key=value` pairs use dotted keys (`source.branch=main`). The
//! CDK context key `appName` is accepted for `app_name`. Dedicated flags win
//! over context pairs. A value is typed after the builtin default at the
//! same path; keys without a default are strings.

use serde_json::{json, Value};

use super::defaults::BuiltinDefaults;
use super::effective::ConfigError;
use super::merge::set_path;

/// Context keys renamed before merging.
const CONTEXT_ALIASES: &[(&str, &str)] = &[("appName", "app_name")];

/// Raw CLI inputs that feed the top config layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub app_name: Option<String>,
    pub context: Vec<String>,
    pub account: Option<String>,
    pub region: Option<String>,
}

/// Split one `key=value` pair and type the value.
pub fn parse_context(entry: &str) -> Result<(String, Value), ConfigError> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| ConfigError::ParseError(format!("context '{}' is not key=value", entry)))?;
    let key = key.trim();
    if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(ConfigError::ParseError(format!(
            "context '{}' has an empty key segment",
            entry
        )));
    }

    let key = CONTEXT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| key.to_string());

    let defaults = BuiltinDefaults::default().to_value();
    let value = typed_value(default_at(&defaults, &key), raw);
    Ok((key, value))
}

fn default_at<'a>(defaults: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .try_fold(defaults, |node, segment| node.get(segment))
}

/// Type `raw` like `default`. Text that does not parse stays a string so
/// deserialization reports the mismatch against the field.
fn typed_value(default: Option<&Value>, raw: &str) -> Value {
    let text = || Value::String(raw.to_string());
    match default {
        Some(Value::Bool(_)) => raw.parse::<bool>().map(Value::Bool).unwrap_or_else(|_| text()),
        Some(Value::Number(_)) => {
            if let Ok(n) = raw.parse::<u64>() {
                json!(n)
            } else if let Ok(n) = raw.parse::<i64>() {
                json!(n)
            } else {
                text()
            }
        }
        _ => text(),
    }
}

/// Build the CLI layer, or `None` when nothing was given.
pub fn cli_overrides(overrides: &CliOverrides) -> Result<Option<Value>, ConfigError> {
    let mut layer = json!({});
    let mut touched = false;

    for entry in &overrides.context {
        let (key, value) = parse_context(entry)?;
        set_path(&mut layer, &key, value);
        touched = true;
    }

    let flags = [
        ("app_name", &overrides.app_name),
        ("env.account", &overrides.account),
        ("env.region", &overrides.region),
    ];
    for (path, value) in flags {
        if let Some(value) = value {
            set_path(&mut layer, path, Value::String(value.clone()));
            touched = true;
        }
    }

    Ok(touched.then_some(layer))
}
