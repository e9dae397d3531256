// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural validators per `{kind, version}`.
//!
//! Validators work on raw JSON values, before any attempt to map onto the
//! typed structs: a payload that fails here is dead-lettered, never
//! deserialized.

use crate::{SchemaRegistry, ValidationIssue};
use arcnet_core::{EntityKind, GEOHASH_LEN};
use serde_json::Value;
use uuid::Uuid;

/// Register every validator this build knows about.
pub(crate) fn register_all(reg: &mut SchemaRegistry) {
    reg.register_validator(EntityKind::NodeTelemetry, 1, telemetry_v1);
    reg.register_validator(EntityKind::NodeTelemetry, 2, telemetry_v2);
    reg.register_validator(EntityKind::InferenceRequest, 1, request_v1);
    reg.register_validator(EntityKind::InferenceRequest, 2, request_v2);
    reg.register_validator(EntityKind::TrainingJob, 1, training_job_v1);
    reg.register_validator(EntityKind::TrainingJob, 2, training_job_v2);
    reg.register_validator(EntityKind::NodeDocument, 1, node_document_v1);
    reg.register_validator(EntityKind::PendingJob, 1, pending_job_v1);
    reg.register_validator(EntityKind::OrnlJob, 1, ornl_job_v1);
    reg.register_validator(EntityKind::FailedJob, 1, failed_job_v1);
    reg.register_validator(EntityKind::RegionalSummary, 1, regional_summary_v1);
    reg.register_validator(EntityKind::DispatchCommand, 1, dispatch_command_v1);
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn issue(field: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn get<'a>(value: &'a Value, field: &str, issues: &mut Vec<ValidationIssue>) -> Option<&'a Value> {
    let v = value.get(field);
    if v.is_none() {
        issues.push(issue(field, "missing"));
    }
    v
}

fn require_uuid(value: &Value, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_str() {
            Some(s) if Uuid::parse_str(s).is_ok() => {}
            Some(s) => issues.push(issue(field, format!("not a UUID: {s:?}"))),
            None => issues.push(issue(field, "must be a string UUID")),
        }
    }
}

fn require_nonempty_str(value: &Value, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_str() {
            Some(s) if !s.is_empty() => {}
            Some(_) => issues.push(issue(field, "must not be empty")),
            None => issues.push(issue(field, "must be a string")),
        }
    }
}

fn require_timestamp(value: &Value, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_str() {
            Some(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => {}
            Some(s) => issues.push(issue(field, format!("not an RFC 3339 timestamp: {s:?}"))),
            None => issues.push(issue(field, "must be a timestamp string")),
        }
    }
}

fn require_unit_interval(value: &Value, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_f64() {
            Some(f) if (0.0..=1.0).contains(&f) => {}
            Some(f) => issues.push(issue(field, format!("{f} outside [0, 1]"))),
            None => issues.push(issue(field, "must be a number")),
        }
    }
}

fn require_nonneg_number(value: &Value, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_f64() {
            Some(f) if f >= 0.0 => {}
            Some(f) => issues.push(issue(field, format!("{f} is negative"))),
            None => issues.push(issue(field, "must be a number")),
        }
    }
}

fn require_positive_int(value: &Value, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_i64() {
            Some(i) if i > 0 => {}
            Some(i) => issues.push(issue(field, format!("{i} is not strictly positive"))),
            None => issues.push(issue(field, "must be an integer")),
        }
    }
}

fn require_nonneg_int(value: &Value, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_i64() {
            Some(i) if i >= 0 => {}
            Some(i) => issues.push(issue(field, format!("{i} is negative"))),
            None => issues.push(issue(field, "must be an integer")),
        }
    }
}

fn require_geohash(value: &Value, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_str() {
            Some(s) if s.chars().count() == GEOHASH_LEN => {}
            Some(s) => issues.push(issue(
                field,
                format!("geohash must be {GEOHASH_LEN} characters, got {}", s.chars().count()),
            )),
            None => issues.push(issue(field, "must be a string")),
        }
    }
}

fn require_enum(value: &Value, field: &str, allowed: &[&str], issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_str() {
            Some(s) if allowed.contains(&s) => {}
            Some(s) => issues.push(issue(field, format!("{s:?} not one of {allowed:?}"))),
            None => issues.push(issue(field, "must be a string")),
        }
    }
}

fn require_string_array(value: &Value, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(v) = get(value, field, issues) {
        match v.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        issues.push(issue(&format!("{field}[{i}]"), "must be a string"));
                    }
                }
            }
            None => issues.push(issue(field, "must be an array")),
        }
    }
}

const ENERGY_TAGS: &[&str] = &["solar", "cogen", "grid", "battery"];
const PRIORITY_TAGS: &[&str] = &["critical", "normal", "background"];
const TARGET_TAGS: &[&str] = &["hpc", "federated"];

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

fn telemetry_common(value: &Value, issues: &mut Vec<ValidationIssue>) {
    require_uuid(value, "node_id", issues);
    require_timestamp(value, "timestamp", issues);
    require_geohash(value, "geohash", issues);
    require_unit_interval(value, "battery_level", issues);
    require_unit_interval(value, "gpu_utilization", issues);
    require_nonneg_number(value, "gpu_memory_free_gb", issues);
    require_string_array(value, "models_loaded", issues);
}

fn telemetry_v1(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    telemetry_common(value, &mut issues);
    // v1 carried a free-form energy-source string; the migration folds it.
    require_nonempty_str(value, "energy_source", &mut issues);
    issues
}

fn telemetry_v2(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    telemetry_common(value, &mut issues);
    require_enum(value, "energy_source", ENERGY_TAGS, &mut issues);
    issues
}

// ---------------------------------------------------------------------------
// Inference requests
// ---------------------------------------------------------------------------

fn request_common(value: &Value, issues: &mut Vec<ValidationIssue>) {
    require_uuid(value, "request_id", issues);
    require_nonempty_str(value, "model_id", issues);
    require_positive_int(value, "context_window_tokens", issues);
    require_positive_int(value, "max_latency_ms", issues);
    require_nonempty_str(value, "requester_geozone", issues);
}

fn request_v1(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    request_common(value, &mut issues);
    // v1 carried an integer priority level; the migration maps it.
    if let Some(v) = get(value, "priority", &mut issues) {
        if !v.is_i64() && !v.is_u64() {
            issues.push(issue("priority", "must be an integer level"));
        }
    }
    issues
}

fn request_v2(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    request_common(value, &mut issues);
    require_enum(value, "priority", PRIORITY_TAGS, &mut issues);
    issues
}

// ---------------------------------------------------------------------------
// Training jobs
// ---------------------------------------------------------------------------

fn training_job_common(value: &Value, issues: &mut Vec<ValidationIssue>) {
    require_uuid(value, "job_id", issues);
    require_nonempty_str(value, "dataset_uri", issues);
    require_nonneg_number(value, "estimated_flops", issues);
    if let Some(v) = value.get("target_override") {
        if !v.is_null() {
            match v.as_str() {
                Some(s) if TARGET_TAGS.contains(&s) => {}
                _ => issues.push(issue("target_override", "must be hpc or federated")),
            }
        }
    }
}

fn training_job_v1(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    training_job_common(value, &mut issues);
    // v1 carried an integer gigabyte count; the migration widens it.
    require_nonneg_int(value, "dataset_size_gb", &mut issues);
    issues
}

fn training_job_v2(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    training_job_common(value, &mut issues);
    require_nonneg_number(value, "dataset_size_gb", &mut issues);
    issues
}

// ---------------------------------------------------------------------------
// Derived documents and envelopes
// ---------------------------------------------------------------------------

fn node_document_v1(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    require_uuid(value, "node_id", &mut issues);
    require_timestamp(value, "timestamp", &mut issues);
    require_geohash(value, "geohash", &mut issues);
    require_nonempty_str(value, "geozone_id", &mut issues);
    require_enum(value, "energy_source", ENERGY_TAGS, &mut issues);
    require_unit_interval(value, "battery_level", &mut issues);
    require_unit_interval(value, "gpu_utilization", &mut issues);
    require_nonneg_number(value, "gpu_memory_free_gb", &mut issues);
    require_string_array(value, "models_loaded", &mut issues);
    require_timestamp(value, "last_seen", &mut issues);
    issues
}

fn pending_job_v1(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    require_uuid(value, "pending_id", &mut issues);
    require_nonempty_str(value, "transfer_task_id", &mut issues);
    require_nonempty_str(value, "destination_path", &mut issues);
    require_timestamp(value, "submitted_at", &mut issues);
    require_nonneg_int(value, "retry_count", &mut issues);
    require_enum(value, "status", &["transferring"], &mut issues);
    if let Some(job) = get(value, "job", &mut issues) {
        issues.extend(training_job_v2(job).into_iter().map(|i| ValidationIssue {
            field: format!("job.{}", i.field),
            message: i.message,
        }));
    }
    issues
}

fn ornl_job_v1(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    require_uuid(value, "ornl_job_id", &mut issues);
    require_nonneg_int(value, "bytes_transferred", &mut issues);
    require_nonneg_int(value, "files_transferred", &mut issues);
    require_timestamp(value, "transfer_completed_at", &mut issues);
    if let Some(pending) = get(value, "pending", &mut issues) {
        issues.extend(pending_job_v1(pending).into_iter().map(|i| ValidationIssue {
            field: format!("pending.{}", i.field),
            message: i.message,
        }));
    }
    if let Some(classification) = get(value, "classification", &mut issues) {
        require_enum(classification, "target", TARGET_TAGS, &mut issues);
    }
    issues
}

fn failed_job_v1(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    require_uuid(value, "failed_id", &mut issues);
    require_nonempty_str(value, "reason", &mut issues);
    require_nonempty_str(value, "error", &mut issues);
    require_timestamp(value, "failed_at", &mut issues);
    issues
}

fn regional_summary_v1(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    require_nonempty_str(value, "geozone_id", &mut issues);
    require_nonneg_int(value, "active_nodes", &mut issues);
    require_nonneg_int(value, "available_gpus", &mut issues);
    require_unit_interval(value, "avg_battery", &mut issues);
    require_unit_interval(value, "avg_gpu_utilization", &mut issues);
    require_timestamp(value, "generated_at", &mut issues);
    issues
}

fn dispatch_command_v1(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    require_enum(value, "command_type", &["inference-dispatch"], &mut issues);
    require_uuid(value, "request_id", &mut issues);
    require_uuid(value, "node_id", &mut issues);
    require_timestamp(value, "issued_at", &mut issues);
    issues
}
