//! Shape validation + normalization phases: confirm the parsed mapping holds
//! the reporting-period shape and produce the typed result.

use serde_json::{Map, Value};

use super::parser::type_name;
use super::types::{ExtractionResult, HolderRecord};
use super::ExtractionError;

/// Validate the parsed payload and normalize it into an `ExtractionResult`.
///
/// Every key must hold a non-empty array of records carrying non-empty
/// string `holder_name` and `percentage` fields. String fields are trimmed;
/// records whose name trims to empty are dropped as model noise, but a
/// period that thereby drops to zero records fails — the usual signature of
/// a truncated or hallucinated response. `allow_empty_periods` keeps empty
/// periods instead of failing.
pub fn validate_payload(
    payload: &Map<String, Value>,
    allow_empty_periods: bool,
) -> Result<ExtractionResult, ExtractionError> {
    if payload.is_empty() {
        return Err(ExtractionError::SchemaViolation {
            path: "$".into(),
            reason: "no reporting-period keys present".into(),
        });
    }

    let mut result = ExtractionResult::default();

    for (period, value) in payload {
        let rows = match value {
            Value::Array(rows) => rows,
            other => {
                return Err(ExtractionError::SchemaViolation {
                    path: format!("$.{period}"),
                    reason: format!(
                        "expected an array of holder records, got {}",
                        type_name(other)
                    ),
                })
            }
        };

        if rows.is_empty() && !allow_empty_periods {
            return Err(ExtractionError::SchemaViolation {
                path: format!("$.{period}"),
                reason: "empty record list under reporting period".into(),
            });
        }

        let mut records = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let record = validate_record(period, idx, row)?;
            if record.holder_name.is_empty() {
                tracing::debug!(period = %period, index = idx, "dropping nameless holder record");
                continue;
            }
            records.push(record);
        }

        if records.is_empty() && !rows.is_empty() {
            return Err(ExtractionError::SchemaViolation {
                path: format!("$.{period}"),
                reason: "all records dropped during normalization".into(),
            });
        }

        result.periods.insert(period.clone(), records);
    }

    Ok(result)
}

fn validate_record(
    period: &str,
    idx: usize,
    row: &Value,
) -> Result<HolderRecord, ExtractionError> {
    let obj = match row {
        Value::Object(obj) => obj,
        other => {
            return Err(ExtractionError::SchemaViolation {
                path: format!("$.{period}[{idx}]"),
                reason: format!("expected a holder record mapping, got {}", type_name(other)),
            })
        }
    };

    let holder_name = required_string(obj, period, idx, "holder_name")?;
    let percentage = required_string(obj, period, idx, "percentage")?;

    Ok(HolderRecord {
        holder_name: holder_name.trim().to_string(),
        percentage: percentage.trim().to_string(),
    })
}

fn required_string<'a>(
    obj: &'a Map<String, Value>,
    period: &str,
    idx: usize,
    field: &str,
) -> Result<&'a str, ExtractionError> {
    match obj.get(field) {
        None => Err(ExtractionError::SchemaViolation {
            path: format!("$.{period}[{idx}].{field}"),
            reason: "required field missing".into(),
        }),
        Some(Value::String(s)) if s.is_empty() => Err(ExtractionError::SchemaViolation {
            path: format!("$.{period}[{idx}].{field}"),
            reason: "required field is empty".into(),
        }),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ExtractionError::SchemaViolation {
            path: format!("$.{period}[{idx}].{field}"),
            reason: format!("expected a string, got {}", type_name(other)),
        }),
    }
}
