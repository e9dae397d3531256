// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pairwise migration steps (vN → vN+1).
//!
//! Each step rewrites a raw JSON value in place and bumps its
//! `schema_version`. Steps never look at more than one version gap;
//! the registry composes them.

use crate::SchemaRegistry;
use arcnet_core::{EnergySource, EntityKind, Priority};
use serde_json::{json, Value};

/// Register every migration this build knows about.
pub(crate) fn register_all(reg: &mut SchemaRegistry) {
    reg.register_migration(EntityKind::NodeTelemetry, 1, telemetry_v1_to_v2);
    reg.register_migration(EntityKind::InferenceRequest, 1, request_v1_to_v2);
    reg.register_migration(EntityKind::TrainingJob, 1, training_job_v1_to_v2);
}

fn set_version(value: &mut Value, version: u32) {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(version));
    }
}

/// v1 carried `energy_source` as a free-form string; fold it onto the
/// enum, defaulting unknown sources to `grid`.
fn telemetry_v1_to_v2(mut value: Value) -> Result<Value, String> {
    let tag = value
        .get("energy_source")
        .and_then(Value::as_str)
        .ok_or_else(|| "energy_source missing or not a string".to_string())?;
    let folded = EnergySource::from_tag(tag);
    value
        .as_object_mut()
        .ok_or_else(|| "telemetry payload is not an object".to_string())?
        .insert("energy_source".to_string(), json!(folded.as_str()));
    set_version(&mut value, 2);
    Ok(value)
}

/// v1 carried `priority` as an integer level 1|2|3; map onto the enum,
/// defaulting unknown levels to `normal`.
fn request_v1_to_v2(mut value: Value) -> Result<Value, String> {
    let level = value
        .get("priority")
        .and_then(Value::as_i64)
        .ok_or_else(|| "priority missing or not an integer".to_string())?;
    let priority = Priority::from_level(level);
    let tag = serde_json::to_value(priority).map_err(|e| e.to_string())?;
    value
        .as_object_mut()
        .ok_or_else(|| "request payload is not an object".to_string())?
        .insert("priority".to_string(), tag);
    set_version(&mut value, 2);
    Ok(value)
}

/// v1 carried `dataset_size_gb` as an integer; widen to a real number.
fn training_job_v1_to_v2(mut value: Value) -> Result<Value, String> {
    let gb = value
        .get("dataset_size_gb")
        .and_then(Value::as_i64)
        .ok_or_else(|| "dataset_size_gb missing or not an integer".to_string())?;
    value
        .as_object_mut()
        .ok_or_else(|| "job payload is not an object".to_string())?
        .insert("dataset_size_gb".to_string(), json!(gb as f64));
    set_version(&mut value, 2);
    Ok(value)
}
