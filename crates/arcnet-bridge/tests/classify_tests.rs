// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tests for the classifier: precedence, thresholds, purity, and the
//! extended factor set.

use arcnet_bridge::{classify, ClassifierConfig};
use arcnet_core::{ClassificationReason, ClassificationTarget, TrainingJob, WireEntity};
use uuid::Uuid;

fn job(dataset_gb: f64, flops: f64) -> TrainingJob {
    TrainingJob {
        job_id: Uuid::new_v4(),
        dataset_uri: "s3://datasets/corpus".to_string(),
        dataset_size_gb: dataset_gb,
        estimated_flops: flops,
        checkpoint_uri: None,
        target_override: None,
        required_gpu_memory_gb: None,
        estimated_checkpoint_size_gb: None,
        requires_high_bandwidth: false,
        schema_version: TrainingJob::CURRENT_VERSION,
    }
}

const BASIC: ClassifierConfig = ClassifierConfig { extended: false };
const EXTENDED: ClassifierConfig = ClassifierConfig { extended: true };

// ---------------------------------------------------------------------------
// Precedence
// ---------------------------------------------------------------------------

#[test]
fn override_beats_every_threshold() {
    let mut j = job(5000.0, 1.0e20);
    j.target_override = Some(ClassificationTarget::Federated);
    let c = classify(&j, &BASIC);
    assert_eq!(c.target, ClassificationTarget::Federated);
    assert_eq!(c.reason, ClassificationReason::ExplicitOverride);

    j.target_override = Some(ClassificationTarget::Hpc);
    let c = classify(&job(1.0, 1.0), &BASIC);
    assert_eq!(c.target, ClassificationTarget::Federated);
    let c = classify(&j, &BASIC);
    assert_eq!(c.target, ClassificationTarget::Hpc);
    assert_eq!(c.reason, ClassificationReason::ExplicitOverride);
}

#[test]
fn large_dataset_goes_hpc() {
    let c = classify(&job(2000.0, 5.0e18), &BASIC);
    assert_eq!(c.target, ClassificationTarget::Hpc);
    assert_eq!(c.reason, ClassificationReason::DatasetThreshold);
}

#[test]
fn heavy_compute_goes_hpc() {
    let c = classify(&job(100.0, 2.0e18), &BASIC);
    assert_eq!(c.target, ClassificationTarget::Hpc);
    assert_eq!(c.reason, ClassificationReason::FlopsThreshold);
}

#[test]
fn small_job_defaults_to_federated() {
    let c = classify(&job(100.0, 1.0e15), &BASIC);
    assert_eq!(c.target, ClassificationTarget::Federated);
    assert_eq!(c.reason, ClassificationReason::Default);
}

#[test]
fn thresholds_are_strict_inequalities() {
    assert_eq!(
        classify(&job(1000.0, 1.0e18), &BASIC).target,
        ClassificationTarget::Federated
    );
}

// ---------------------------------------------------------------------------
// Extended factors
// ---------------------------------------------------------------------------

#[test]
fn extended_factors_require_the_flag() {
    let mut j = job(10.0, 1.0e12);
    j.required_gpu_memory_gb = Some(512.0);
    assert_eq!(classify(&j, &BASIC).target, ClassificationTarget::Federated);
    let c = classify(&j, &EXTENDED);
    assert_eq!(c.target, ClassificationTarget::Hpc);
    assert_eq!(c.reason, ClassificationReason::GpuMemoryThreshold);
}

#[test]
fn big_checkpoint_triggers_hpc_when_extended() {
    let mut j = job(10.0, 1.0e12);
    j.estimated_checkpoint_size_gb = Some(250.0);
    let c = classify(&j, &EXTENDED);
    assert_eq!(c.target, ClassificationTarget::Hpc);
    assert_eq!(c.reason, ClassificationReason::CheckpointThreshold);
}

#[test]
fn bandwidth_flag_triggers_hpc_when_extended() {
    let mut j = job(10.0, 1.0e12);
    j.requires_high_bandwidth = true;
    let c = classify(&j, &EXTENDED);
    assert_eq!(c.target, ClassificationTarget::Hpc);
    assert_eq!(c.reason, ClassificationReason::HighBandwidth);
}

// ---------------------------------------------------------------------------
// Purity & observability
// ---------------------------------------------------------------------------

#[test]
fn classification_is_deterministic() {
    let j = job(512.0, 3.0e17);
    let first = classify(&j, &EXTENDED);
    for _ in 0..10 {
        assert_eq!(classify(&j, &EXTENDED), first);
    }
}

#[test]
fn factors_expose_the_inputs() {
    let c = classify(&job(2000.0, 5.0e18), &BASIC);
    assert_eq!(c.factors["dataset_size_gb"], serde_json::json!(2000.0));
    assert_eq!(c.factors["estimated_flops"], serde_json::json!(5.0e18));
}
