//! Purpose: Unwrap the upstream's optionally double-encoded JSON results.
//! Exports: `NormalizedResult`, `normalize`, `RETURN_FIELD`.
//! Role: Pure transformation between a raw remote call result and the `{error?, data?}` shape.
//! Invariants: Each stage decodes only when its field holds a string; otherwise it passes through.
//! Invariants: Every decode failure becomes `ErrorKind::Decode` tagged with its `DecodeStage`.
//! Invariants: A stage that yields a non-object is a decode failure for that stage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{DecodeStage, Error, ErrorKind};
use crate::json::parse;

/// Field of the first-stage object that may hold the second JSON document.
pub const RETURN_FIELD: &str = "return";

/// The `{error?, data?}` shape every operation ultimately returns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl NormalizedResult {
    pub fn data(data: Value) -> Self {
        Self {
            error: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            data: None,
        }
    }

    /// Splits into the payload for the caller or a `Business` error carrying
    /// the service-provided message verbatim.
    pub fn into_data(self) -> Result<Value, Error> {
        match self.error {
            Some(message) => Err(Error::new(ErrorKind::Business).with_message(message)),
            None => Ok(self.data.unwrap_or(Value::Null)),
        }
    }

    fn from_object(mut object: Map<String, Value>) -> Self {
        let error = object.remove("error").and_then(error_text);
        let data = object.remove("data").filter(|value| !value.is_null());
        Self { error, data }
    }
}

/// Applies the two optional decode stages to `raw`.
///
/// `result_field` names the key on the outer object that may carry the
/// first-stage JSON text; it differs per remote operation.
pub fn normalize(raw: Value, result_field: &str) -> Result<NormalizedResult, Error> {
    let stage1 = match raw.get(result_field) {
        Some(Value::String(text)) => decode(text, DecodeStage::Envelope)?,
        _ => raw,
    };
    let stage1 = expect_object(stage1, DecodeStage::Envelope)?;

    let stage2 = match stage1.get(RETURN_FIELD) {
        Some(Value::String(text)) => decode(text, DecodeStage::Return)?,
        _ => Value::Object(stage1),
    };
    let stage2 = expect_object(stage2, DecodeStage::Return)?;

    Ok(NormalizedResult::from_object(stage2))
}

fn decode(text: &str, stage: DecodeStage) -> Result<Value, Error> {
    parse::from_str::<Value>(text).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message(format!(
                "{stage} field is not valid JSON ({})",
                parse::describe_error(&err)
            ))
            .with_stage(stage)
    })
}

fn expect_object(value: Value, stage: DecodeStage) -> Result<Map<String, Value>, Error> {
    match value {
        Value::Object(object) => Ok(object),
        other => Err(Error::new(ErrorKind::Decode)
            .with_message(format!(
                "{stage} stage produced {} instead of an object",
                json_type_name(&other)
            ))
            .with_stage(stage)),
    }
}

// Falsy values (`null`, `false`, `""`, zero) do not count as an error.
fn error_text(value: Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Number(number) if number.as_f64() == Some(0.0) => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
