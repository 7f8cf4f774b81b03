//! CloudFormation intrinsic function helpers.

use serde_json::{json, Value};

/// `{"Ref": name}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [id, attr]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// Wrap a string in `Fn::Sub` when it contains `${...}` placeholders.
///
/// Literal strings stay plain so fully concrete stacks synthesize without
/// intrinsics.
pub fn sub(text: &str) -> Value {
    if text.contains("${") {
        json!({ "Fn::Sub": text })
    } else {
        Value::String(text.to_string())
    }
}
