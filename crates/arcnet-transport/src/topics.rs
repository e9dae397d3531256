// SPDX-License-Identifier: MIT OR Apache-2.0
//! Contractual topic names.
//!
//! These strings are part of the external interface; renaming one is a
//! breaking change for every producer and consumer on the mesh.

use arcnet_core::GeozoneId;

/// Worker-node telemetry, keyed by node id.
pub const TELEMETRY_NODES: &str = "arc.telemetry.nodes";

/// Regional rollups, keyed by geozone id.
pub const TELEMETRY_REGIONAL_SUMMARY: &str = "arc.telemetry.regional-summary";

/// Client inference requests, keyed by request id.
pub const REQUEST_INFERENCE: &str = "arc.request.inference";

/// Requests with remaining retry budget, keyed by request id.
pub const REQUEST_RETRY: &str = "arc.request.retry";

/// Requests whose retry budget is exhausted, keyed by request id.
pub const REQUEST_REJECTED: &str = "arc.request.rejected";

/// Training-job submissions, keyed by job id.
pub const JOB_SUBMISSION: &str = "arc.job.submission";

/// Open HPC transfers, keyed by pending id. Doubles as the bridge's
/// delay queue.
pub const BRIDGE_PENDING: &str = "arc.bridge.pending";

/// Terminal transfer successes, keyed by ornl job id.
pub const ORNL_INGRESS: &str = "ornl.bridge.ingress";

/// Federated training hand-offs, keyed by job id.
pub const SCHEDULER_TRAINING: &str = "arc.scheduler.training";

/// Terminal bridge failures, keyed by failed id.
pub const BRIDGE_FAILED: &str = "arc.bridge.failed";

/// Dispatch commands for one geozone, keyed by node id.
#[must_use]
pub fn dispatch(geozone: &GeozoneId) -> String {
    format!("arc.command.dispatch.{geozone}")
}

/// The dead-letter mirror of a topic.
#[must_use]
pub fn dead_letter(topic: &str) -> String {
    format!("arc.dead-letter.{topic}")
}
