//! Parse phase: turn the selected structured span into a JSON mapping, and
//! the facade chaining all three response-recovery stages.

use serde_json::{Map, Value};

use super::span::find_structured_span;
use super::types::ExtractionResult;
use super::validate::validate_payload;
use super::ExtractionError;

/// Full response-recovery chain: span extraction → parse → shape validation.
///
/// The three stages stay independent so failures attribute precisely —
/// a missing payload and a wrong-shaped payload are different errors.
pub fn parse_model_response(
    response: &str,
    lenient: bool,
    allow_empty_periods: bool,
) -> Result<ExtractionResult, ExtractionError> {
    let span = find_structured_span(response)?;
    let payload = parse_payload(span, lenient)?;
    validate_payload(&payload, allow_empty_periods)
}

/// Parse a candidate span into a JSON object.
///
/// With `lenient` set, trailing commas before `}` / `]` are stripped first —
/// models frequently echo the prompt's example shape, which carries them.
pub fn parse_payload(
    span: &str,
    lenient: bool,
) -> Result<Map<String, Value>, ExtractionError> {
    let cleaned;
    let text = if lenient {
        cleaned = strip_trailing_commas(span);
        cleaned.as_str()
    } else {
        span
    };

    let value: Value = serde_json::from_str(text)
        .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(ExtractionError::SchemaViolation {
            path: "$".into(),
            reason: format!(
                "expected a mapping of reporting periods, got {}",
                type_name(&other)
            ),
        }),
    }
}

/// Human-readable JSON type name for diagnostics.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

/// Remove commas left dangling before a closing bracket, outside strings.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '}' | ']' => {
                while out.ends_with(|p: char| p.is_ascii_whitespace()) {
                    out.pop();
                }
                if out.ends_with(',') {
                    out.pop();
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
