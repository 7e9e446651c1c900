//! JSON Schema checks for structured output and handoff payloads.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// Check that `schema` compiles.
pub(crate) fn check_schema(schema: &Value) -> Result<(), String> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map(|_| ())
        .map_err(|err| format!("Invalid JSON schema: {err}"))
}

/// Validate `instance` against `schema`, joining every violation into one
/// message.
pub(crate) fn validate(schema: &Value, instance: &Value) -> Result<(), String> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|err| format!("Invalid JSON schema: {err}"))?;
    if let Err(errors) = compiled.validate(instance) {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(messages.join("; "));
    }
    Ok(())
}
