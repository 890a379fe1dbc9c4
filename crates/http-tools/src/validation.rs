//! Argument validation against a tool's JSON input schema.

use serde_json::{Value, json};

/// Validation failure: a short message plus a structured list of violations.
#[derive(Debug, Clone)]
pub struct ArgumentErrors {
    pub message: String,
    pub details: Value,
}

/// Validate `args` against `schema`.
///
/// Reports unknown parameters (with close-match suggestions), missing required parameters,
/// and JSON-schema constraint violations in a single pass.
///
/// # Errors
///
/// Returns [`ArgumentErrors`] when at least one violation is found.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), ArgumentErrors> {
    let Some(args_obj) = args.as_object() else {
        return Err(ArgumentErrors {
            message: "Invalid params: arguments must be a JSON object".to_string(),
            details: json!({ "type": "validation-errors", "violations": [] }),
        });
    };

    let props = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let known: Vec<&str> = props.keys().map(String::as_str).collect();

    let mut violations: Vec<Value> = Vec::new();

    for key in args_obj.keys() {
        if props.contains_key(key) {
            continue;
        }
        violations.push(json!({
            "type": "invalid-parameter",
            "parameter": key,
            "suggestions": suggest(key, &known),
            "validParameters": known,
        }));
    }

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for name in required {
        if !args_obj.contains_key(name) {
            violations.push(json!({
                "type": "missing-required-parameter",
                "parameter": name,
            }));
        }
    }

    match jsonschema::validator_for(schema) {
        Ok(validator) => {
            for e in validator.iter_errors(args) {
                // Top-level required params are already reported above.
                if matches!(
                    e.kind(),
                    jsonschema::error::ValidationErrorKind::Required { .. }
                ) && e.instance_path().to_string().is_empty()
                {
                    continue;
                }
                violations.push(json!({
                    "type": "constraint-violation",
                    "message": e.to_string(),
                    "instancePath": e.instance_path().to_string(),
                }));
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "tool input schema does not compile; skipping constraint checks");
        }
    }

    if violations.is_empty() {
        return Ok(());
    }

    Err(ArgumentErrors {
        message: summarize(&violations),
        details: json!({ "type": "validation-errors", "violations": violations }),
    })
}

fn summarize(violations: &[Value]) -> String {
    let first = &violations[0];
    let param = first.get("parameter").and_then(Value::as_str).unwrap_or("?");
    match first.get("type").and_then(Value::as_str) {
        Some("invalid-parameter") => {
            let hint = first
                .get("suggestions")
                .and_then(Value::as_array)
                .and_then(|s| s.first())
                .and_then(Value::as_str);
            match hint {
                Some(h) => format!("Invalid params: unknown parameter '{param}' (did you mean '{h}'?)"),
                None => format!("Invalid params: unknown parameter '{param}'"),
            }
        }
        Some("missing-required-parameter") if violations.len() == 1 => {
            format!("Invalid params: missing required parameter '{param}'")
        }
        _ => format!(
            "Invalid params: validation failed with {} error(s)",
            violations.len()
        ),
    }
}

fn suggest(unknown: &str, known: &[&str]) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = known
        .iter()
        .map(|k| (strsim::jaro(unknown, k), *k))
        .filter(|(score, _)| *score > 0.7)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, k)| k.to_string()).collect()
}
