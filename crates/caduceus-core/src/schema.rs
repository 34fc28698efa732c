//! JSON Schema validation for the caller-facing run view.
//!
//! Every serialized [`RunView`](crate::view::RunView) must validate against
//! `schema/run_view.schema.json`, whatever state the run ended in.

use std::sync::OnceLock;

use crate::CoreError;

const RUN_VIEW_SCHEMA_JSON: &str = include_str!("../schema/run_view.schema.json");

static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, CoreError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(RUN_VIEW_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| CoreError::SchemaLoad(e.clone()))
}

/// Validate a run view JSON value.
///
/// Returns every violation, each suffixed with its instance path.
pub fn validate_run_view(view_json: &serde_json::Value) -> Result<(), CoreError> {
    let validator = get_validator()?;

    let errors: Vec<String> = validator
        .iter_errors(view_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::SchemaViolation(errors))
    }
}
