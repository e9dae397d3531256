// SPDX-License-Identifier: MIT OR Apache-2.0
//! Training-job classification.
//!
//! A pure function: the same job always yields the same target. The
//! first rule to fire wins, and the inputs that drove the decision come
//! back in the factor map for observability.

use arcnet_core::{Classification, ClassificationReason, ClassificationTarget, TrainingJob};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Dataset size above which a job leaves the mesh, in gigabytes.
pub const DATASET_THRESHOLD_GB: f64 = 1000.0;

/// Estimated compute above which a job leaves the mesh, in FLOPs.
pub const FLOPS_THRESHOLD: f64 = 1.0e18;

/// GPU memory requirement above what mesh nodes offer, in gigabytes.
pub const GPU_MEMORY_THRESHOLD_GB: f64 = 256.0;

/// Checkpoint size above which shuttling across the mesh is impractical.
pub const CHECKPOINT_THRESHOLD_GB: f64 = 100.0;

/// Classifier policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Honor the extended factor set (GPU memory, checkpoint size,
    /// bandwidth flag) as HPC triggers.
    pub extended: bool,
}

/// Classify a training job.
#[must_use]
pub fn classify(job: &TrainingJob, config: &ClassifierConfig) -> Classification {
    let mut factors = BTreeMap::new();
    factors.insert("dataset_size_gb".to_string(), json!(job.dataset_size_gb));
    factors.insert("estimated_flops".to_string(), json!(job.estimated_flops));
    if let Some(target) = job.target_override {
        factors.insert("target_override".to_string(), json!(target.to_string()));
    }

    let (target, reason) = decide(job, config, &mut factors);
    Classification {
        target,
        reason,
        factors,
    }
}

fn decide(
    job: &TrainingJob,
    config: &ClassifierConfig,
    factors: &mut BTreeMap<String, serde_json::Value>,
) -> (ClassificationTarget, ClassificationReason) {
    if let Some(target) = job.target_override {
        return (target, ClassificationReason::ExplicitOverride);
    }
    if job.dataset_size_gb > DATASET_THRESHOLD_GB {
        return (
            ClassificationTarget::Hpc,
            ClassificationReason::DatasetThreshold,
        );
    }
    if job.estimated_flops > FLOPS_THRESHOLD {
        return (
            ClassificationTarget::Hpc,
            ClassificationReason::FlopsThreshold,
        );
    }
    if config.extended {
        if let Some(gpu_gb) = job.required_gpu_memory_gb {
            factors.insert("required_gpu_memory_gb".to_string(), json!(gpu_gb));
            if gpu_gb > GPU_MEMORY_THRESHOLD_GB {
                return (
                    ClassificationTarget::Hpc,
                    ClassificationReason::GpuMemoryThreshold,
                );
            }
        }
        if let Some(ckpt_gb) = job.estimated_checkpoint_size_gb {
            factors.insert("estimated_checkpoint_size_gb".to_string(), json!(ckpt_gb));
            if ckpt_gb > CHECKPOINT_THRESHOLD_GB {
                return (
                    ClassificationTarget::Hpc,
                    ClassificationReason::CheckpointThreshold,
                );
            }
        }
        if job.requires_high_bandwidth {
            factors.insert("requires_high_bandwidth".to_string(), json!(true));
            return (
                ClassificationTarget::Hpc,
                ClassificationReason::HighBandwidth,
            );
        }
    }
    (
        ClassificationTarget::Federated,
        ClassificationReason::Default,
    )
}
