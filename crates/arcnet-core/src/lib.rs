// SPDX-License-Identifier: MIT OR Apache-2.0
//! arcnet-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the ArcNet mesh control plane.
//!
//! Every record that crosses the bus is defined here, together with the
//! geohash/geozone helpers and the observability adapter the components
//! share. Nothing in this crate talks to the bus, the store, or the
//! network; it is types all the way down.

/// Geohash and geozone value types.
pub mod geo;
/// Timed-operation adapter and in-process operation metrics.
pub mod observe;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub use geo::{Geohash, GeohashError, GeozoneId, GEOHASH_LEN, GEOZONE_PREFIX_LEN};

/// How long after its last telemetry a node still counts as live.
pub const LIVENESS_WINDOW_SECS: i64 = 30;

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// Logical kind tag carried in every frame and in the `entity-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// Raw node telemetry sample.
    NodeTelemetry,
    /// Client inference request.
    InferenceRequest,
    /// Client training-job submission.
    TrainingJob,
    /// Derived per-node document held by the regional state tier.
    NodeDocument,
    /// Open HPC transfer tracked by the bridge.
    PendingJob,
    /// Terminal success envelope for an HPC transfer.
    OrnlJob,
    /// Terminal failure envelope for a bridge workflow.
    FailedJob,
    /// Periodic per-geozone rollup.
    RegionalSummary,
    /// Command instructing a node to serve an inference request.
    DispatchCommand,
}

impl EntityKind {
    /// The kebab-case tag used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeTelemetry => "node-telemetry",
            Self::InferenceRequest => "inference-request",
            Self::TrainingJob => "training-job",
            Self::NodeDocument => "node-document",
            Self::PendingJob => "pending-job",
            Self::OrnlJob => "ornl-job",
            Self::FailedJob => "failed-job",
            Self::RegionalSummary => "regional-summary",
            Self::DispatchCommand => "dispatch-command",
        }
    }

    /// Parse a wire tag back into a kind.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "node-telemetry" => Some(Self::NodeTelemetry),
            "inference-request" => Some(Self::InferenceRequest),
            "training-job" => Some(Self::TrainingJob),
            "node-document" => Some(Self::NodeDocument),
            "pending-job" => Some(Self::PendingJob),
            "ornl-job" => Some(Self::OrnlJob),
            "failed-job" => Some(Self::FailedJob),
            "regional-summary" => Some(Self::RegionalSummary),
            "dispatch-command" => Some(Self::DispatchCommand),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record type that can travel inside a frame.
///
/// Consumers are compiled against [`CURRENT_VERSION`](Self::CURRENT_VERSION);
/// the schema registry migrates older payloads up before they are handed
/// to a handler.
pub trait WireEntity: Serialize + serde::de::DeserializeOwned {
    /// The kind tag this type frames as.
    const KIND: EntityKind;
    /// The schema version this build handles.
    const CURRENT_VERSION: u32;
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Power source currently feeding a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnergySource {
    /// On-site photovoltaic.
    Solar,
    /// Combined heat and power.
    Cogen,
    /// Utility grid.
    Grid,
    /// Running on local battery.
    Battery,
}

impl EnergySource {
    /// Case-folded lookup used by the v1 → v2 telemetry migration.
    ///
    /// Unknown strings fold to [`EnergySource::Grid`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "solar" => Self::Solar,
            "cogen" => Self::Cogen,
            "battery" => Self::Battery,
            _ => Self::Grid,
        }
    }

    /// The snake_case tag used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solar => "solar",
            Self::Cogen => "cogen",
            Self::Grid => "grid",
            Self::Battery => "battery",
        }
    }
}

impl fmt::Display for EnergySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority of an inference request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Latency-sensitive, scheduled first.
    Critical,
    /// Default priority.
    #[default]
    Normal,
    /// Deferred work.
    Background,
}

impl Priority {
    /// Mapping used by the v1 → v2 request migration (1|2|3, unknown → normal).
    #[must_use]
    pub fn from_level(level: i64) -> Self {
        match level {
            1 => Self::Critical,
            3 => Self::Background,
            _ => Self::Normal,
        }
    }
}

/// Where a training job is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationTarget {
    /// Bridge the job to the external HPC facility.
    Hpc,
    /// Train across the mesh.
    Federated,
}

impl fmt::Display for ClassificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hpc => "hpc",
            Self::Federated => "federated",
        })
    }
}

/// Substate reported by the external transfer service for an open task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Queued at the transfer service.
    Pending,
    /// Bytes are moving.
    Active,
    /// Completed successfully.
    Succeeded,
    /// Terminally failed.
    Failed,
    /// Canceled by an operator or by us.
    Canceled,
    /// The service returned a status this build does not recognise.
    Unknown,
}

impl TransferStatus {
    /// True for `succeeded`, `failed`, and `canceled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// One telemetry sample emitted by a worker node.
///
/// Immutable once emitted; the regional tier derives [`NodeDocument`]s from
/// these, it never mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeTelemetry {
    /// Stable node identity.
    pub node_id: Uuid,
    /// Wall-clock time at which the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Node position, six base-32 characters.
    pub geohash: Geohash,
    /// Power source at sample time.
    pub energy_source: EnergySource,
    /// State of charge in `[0, 1]`.
    pub battery_level: f64,
    /// GPU busy fraction in `[0, 1]`.
    pub gpu_utilization: f64,
    /// Free GPU memory in gigabytes.
    pub gpu_memory_free_gb: f64,
    /// Model identifiers currently resident, in load order.
    pub models_loaded: Vec<String>,
    /// Schema version the producer emitted.
    #[serde(default = "NodeTelemetry::current_version")]
    pub schema_version: u32,
}

impl NodeTelemetry {
    /// The telemetry version this build handles.
    #[must_use]
    pub fn current_version() -> u32 {
        Self::CURRENT_VERSION
    }
}

impl WireEntity for NodeTelemetry {
    const KIND: EntityKind = EntityKind::NodeTelemetry;
    const CURRENT_VERSION: u32 = 2;
}

// ---------------------------------------------------------------------------
// Inference requests & dispatch
// ---------------------------------------------------------------------------

/// A client request for inference capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InferenceRequest {
    /// Request identity; also the bus partition key.
    pub request_id: Uuid,
    /// Model the request must run on.
    pub model_id: String,
    /// Context window the request needs, in tokens. Strictly positive.
    pub context_window_tokens: u32,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Priority,
    /// Latency bound the client asked for. Strictly positive.
    pub max_latency_ms: u32,
    /// Geozone (geohash prefix) the request originates from.
    pub requester_geozone: String,
    /// Schema version the producer emitted.
    #[serde(default = "InferenceRequest::current_version")]
    pub schema_version: u32,
}

impl InferenceRequest {
    /// The request version this build handles.
    #[must_use]
    pub fn current_version() -> u32 {
        Self::CURRENT_VERSION
    }
}

impl WireEntity for InferenceRequest {
    const KIND: EntityKind = EntityKind::InferenceRequest;
    const CURRENT_VERSION: u32 = 2;
}

/// Wire tag for [`DispatchCommand::command_type`].
pub const INFERENCE_DISPATCH: &str = "inference-dispatch";

/// Command instructing a specific node to serve a request.
///
/// Exactly one of these is emitted per successfully scheduled request; the
/// receiving node is responsible for eventually releasing the reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DispatchCommand {
    /// Always [`INFERENCE_DISPATCH`].
    pub command_type: String,
    /// Request being dispatched.
    pub request_id: Uuid,
    /// Node that won the reservation.
    pub node_id: Uuid,
    /// When the scheduler issued the command.
    pub issued_at: DateTime<Utc>,
    /// Schema version the producer emitted.
    #[serde(default = "DispatchCommand::current_version")]
    pub schema_version: u32,
}

impl DispatchCommand {
    /// Build a dispatch command for a request/node pair.
    #[must_use]
    pub fn new(request_id: Uuid, node_id: Uuid, issued_at: DateTime<Utc>) -> Self {
        Self {
            command_type: INFERENCE_DISPATCH.to_string(),
            request_id,
            node_id,
            issued_at,
            schema_version: Self::CURRENT_VERSION,
        }
    }

    /// The command version this build handles.
    #[must_use]
    pub fn current_version() -> u32 {
        Self::CURRENT_VERSION
    }
}

impl WireEntity for DispatchCommand {
    const KIND: EntityKind = EntityKind::DispatchCommand;
    const CURRENT_VERSION: u32 = 1;
}

// ---------------------------------------------------------------------------
// Training jobs & bridge envelopes
// ---------------------------------------------------------------------------

/// A training-job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrainingJob {
    /// Job identity; also the bus partition key.
    pub job_id: Uuid,
    /// Where the training data lives.
    pub dataset_uri: String,
    /// Dataset size in gigabytes.
    pub dataset_size_gb: f64,
    /// Estimated training compute in FLOPs.
    pub estimated_flops: f64,
    /// Optional checkpoint to resume from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_uri: Option<String>,
    /// Explicit routing override, set by the submitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_override: Option<ClassificationTarget>,
    /// GPU memory the job needs, if the submitter knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_gpu_memory_gb: Option<f64>,
    /// Expected checkpoint size, if the submitter knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_checkpoint_size_gb: Option<f64>,
    /// Whether the job needs high-bandwidth interconnect.
    #[serde(default)]
    pub requires_high_bandwidth: bool,
    /// Schema version the producer emitted.
    #[serde(default = "TrainingJob::current_version")]
    pub schema_version: u32,
}

impl TrainingJob {
    /// The job version this build handles.
    #[must_use]
    pub fn current_version() -> u32 {
        Self::CURRENT_VERSION
    }
}

impl WireEntity for TrainingJob {
    const KIND: EntityKind = EntityKind::TrainingJob;
    const CURRENT_VERSION: u32 = 2;
}

/// Why the classifier picked a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationReason {
    /// The submitter forced the target.
    ExplicitOverride,
    /// Dataset larger than the mesh threshold.
    DatasetThreshold,
    /// Estimated compute above the mesh threshold.
    FlopsThreshold,
    /// GPU memory requirement above what mesh nodes offer.
    GpuMemoryThreshold,
    /// Checkpoint too large to shuttle across the mesh.
    CheckpointThreshold,
    /// The job asked for high-bandwidth interconnect.
    HighBandwidth,
    /// Nothing forced HPC; train across the mesh.
    Default,
}

impl ClassificationReason {
    /// The kebab-case tag used in headers and factor maps.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExplicitOverride => "explicit-override",
            Self::DatasetThreshold => "dataset-threshold",
            Self::FlopsThreshold => "flops-threshold",
            Self::GpuMemoryThreshold => "gpu-memory-threshold",
            Self::CheckpointThreshold => "checkpoint-threshold",
            Self::HighBandwidth => "high-bandwidth",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for ClassificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying a [`TrainingJob`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    /// Routing decision.
    pub target: ClassificationTarget,
    /// First rule that fired.
    pub reason: ClassificationReason,
    /// Inputs the decision was made from, for observability.
    pub factors: BTreeMap<String, serde_json::Value>,
}

/// Status of a [`PendingJob`]. Currently the only live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    /// The transfer has been accepted by the external service.
    Transferring,
}

/// An HPC transfer the bridge has started but not yet seen finish.
///
/// Lives on the pending topic; the durable log's round-trip is the retry
/// delay. Terminates as exactly one [`OrnlJob`] or [`FailedJob`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PendingJob {
    /// Identity of this pending record; also its partition key.
    pub pending_id: Uuid,
    /// The submission that started the transfer.
    pub job: TrainingJob,
    /// Task handle at the external transfer service.
    pub transfer_task_id: String,
    /// Destination path at the HPC facility.
    pub destination_path: String,
    /// When the transfer was accepted.
    pub submitted_at: DateTime<Utc>,
    /// Poll attempts so far.
    pub retry_count: u32,
    /// Always [`PendingStatus::Transferring`] while on the topic.
    pub status: PendingStatus,
    /// Schema version the producer emitted.
    #[serde(default = "PendingJob::current_version")]
    pub schema_version: u32,
}

impl PendingJob {
    /// The pending-record version this build handles.
    #[must_use]
    pub fn current_version() -> u32 {
        Self::CURRENT_VERSION
    }
}

impl WireEntity for PendingJob {
    const KIND: EntityKind = EntityKind::PendingJob;
    const CURRENT_VERSION: u32 = 1;
}

/// Terminal success envelope handed to the HPC ingress topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OrnlJob {
    /// Identity of the terminal record.
    pub ornl_job_id: Uuid,
    /// The pending record that completed.
    pub pending: PendingJob,
    /// Bytes moved by the transfer.
    pub bytes_transferred: u64,
    /// Files moved by the transfer.
    pub files_transferred: u64,
    /// When the transfer service reported success.
    pub transfer_completed_at: DateTime<Utc>,
    /// The classification that routed this job to HPC.
    pub classification: Classification,
    /// Schema version the producer emitted.
    #[serde(default = "OrnlJob::current_version")]
    pub schema_version: u32,
}

impl OrnlJob {
    /// The envelope version this build handles.
    #[must_use]
    pub fn current_version() -> u32 {
        Self::CURRENT_VERSION
    }
}

impl WireEntity for OrnlJob {
    const KIND: EntityKind = EntityKind::OrnlJob;
    const CURRENT_VERSION: u32 = 1;
}

/// Terminal failure envelope for a bridge workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FailedJob {
    /// Identity of the terminal record.
    pub failed_id: Uuid,
    /// The job that failed.
    pub job: TrainingJob,
    /// Free-form failure tag, e.g. `transfer-failed`.
    pub reason: String,
    /// Human-readable error detail.
    pub error: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
    /// Schema version the producer emitted.
    #[serde(default = "FailedJob::current_version")]
    pub schema_version: u32,
}

impl FailedJob {
    /// The envelope version this build handles.
    #[must_use]
    pub fn current_version() -> u32 {
        Self::CURRENT_VERSION
    }
}

impl WireEntity for FailedJob {
    const KIND: EntityKind = EntityKind::FailedJob;
    const CURRENT_VERSION: u32 = 1;
}

// ---------------------------------------------------------------------------
// Node documents & reservations
// ---------------------------------------------------------------------------

/// Exclusive claim on a node held by a specific inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Reservation {
    /// Request holding the claim.
    pub request_id: Uuid,
    /// Instant at which the claim lapses.
    pub expires_at: DateTime<Utc>,
    /// Instant at which the claim was taken.
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Whether the claim is still in force at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// The regional tier's view of one node: its most recent telemetry plus
/// ingestion bookkeeping and the reservation slot.
///
/// The store exclusively owns the document. Ingestion rewrites the
/// telemetry-derived fields; the reservation slot is the only field
/// mutated from outside the ingestion path, and only through the store's
/// compare-and-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeDocument {
    /// Stable node identity.
    pub node_id: Uuid,
    /// Timestamp of the most recent telemetry sample.
    pub timestamp: DateTime<Utc>,
    /// Node position, six base-32 characters.
    pub geohash: Geohash,
    /// Coarse region key, the first three geohash characters.
    pub geozone_id: GeozoneId,
    /// Power source at the last sample.
    pub energy_source: EnergySource,
    /// State of charge in `[0, 1]`.
    pub battery_level: f64,
    /// GPU busy fraction in `[0, 1]`.
    pub gpu_utilization: f64,
    /// Free GPU memory in gigabytes.
    pub gpu_memory_free_gb: f64,
    /// Model identifiers currently resident, in load order.
    pub models_loaded: Vec<String>,
    /// When the regional tier ingested the last sample.
    pub last_seen: DateTime<Utc>,
    /// Mutual-exclusion slot; `None` when unclaimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Reservation>,
    /// Schema version of the document shape.
    #[serde(default = "NodeDocument::current_version")]
    pub schema_version: u32,
}

impl NodeDocument {
    /// Derive a document from a telemetry sample at ingestion time.
    #[must_use]
    pub fn from_telemetry(telemetry: &NodeTelemetry, ingested_at: DateTime<Utc>) -> Self {
        Self {
            node_id: telemetry.node_id,
            timestamp: telemetry.timestamp,
            geohash: telemetry.geohash.clone(),
            geozone_id: telemetry.geohash.geozone(),
            energy_source: telemetry.energy_source,
            battery_level: telemetry.battery_level,
            gpu_utilization: telemetry.gpu_utilization,
            gpu_memory_free_gb: telemetry.gpu_memory_free_gb,
            models_loaded: telemetry.models_loaded.clone(),
            last_seen: ingested_at,
            reservation: None,
            schema_version: Self::CURRENT_VERSION,
        }
    }

    /// Apply a newer telemetry sample, preserving the reservation slot.
    #[must_use]
    pub fn refreshed(&self, telemetry: &NodeTelemetry, ingested_at: DateTime<Utc>) -> Self {
        let mut next = Self::from_telemetry(telemetry, ingested_at);
        next.reservation = self.reservation.clone();
        next
    }

    /// Live iff `now - last_seen` is within [`LIVENESS_WINDOW_SECS`].
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_seen).num_seconds() <= LIVENESS_WINDOW_SECS
    }

    /// Whether the given model is resident on the node.
    #[must_use]
    pub fn has_model(&self, model_id: &str) -> bool {
        self.models_loaded.iter().any(|m| m == model_id)
    }

    /// The reservation currently in force, if any.
    #[must_use]
    pub fn active_reservation(&self, now: DateTime<Utc>) -> Option<&Reservation> {
        self.reservation.as_ref().filter(|r| r.is_active(now))
    }

    /// The document version this build handles.
    #[must_use]
    pub fn current_version() -> u32 {
        Self::CURRENT_VERSION
    }
}

impl WireEntity for NodeDocument {
    const KIND: EntityKind = EntityKind::NodeDocument;
    const CURRENT_VERSION: u32 = 1;
}

// ---------------------------------------------------------------------------
// Regional summaries
// ---------------------------------------------------------------------------

/// Per-geozone rollup published every aggregation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RegionalSummary {
    /// Geozone this summary covers; also its partition key.
    pub geozone_id: GeozoneId,
    /// Nodes seen within the liveness window.
    pub active_nodes: u64,
    /// Live nodes with an unclaimed reservation slot.
    pub available_gpus: u64,
    /// Mean battery level across live nodes.
    pub avg_battery: f64,
    /// Mean GPU utilization across live nodes.
    pub avg_gpu_utilization: f64,
    /// Live-node count per energy source.
    pub energy_sources: BTreeMap<String, u64>,
    /// When the summary was computed.
    pub generated_at: DateTime<Utc>,
    /// Schema version the producer emitted.
    #[serde(default = "RegionalSummary::current_version")]
    pub schema_version: u32,
}

impl RegionalSummary {
    /// The summary version this build handles.
    #[must_use]
    pub fn current_version() -> u32 {
        Self::CURRENT_VERSION
    }
}

impl WireEntity for RegionalSummary {
    const KIND: EntityKind = EntityKind::RegionalSummary;
    const CURRENT_VERSION: u32 = 1;
}
