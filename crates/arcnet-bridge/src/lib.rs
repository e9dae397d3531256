// SPDX-License-Identifier: MIT OR Apache-2.0
//! arcnet-bridge
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The bridge orchestrator: two concurrent consumers feeding one
//! producer.
//!
//! The submission loop classifies incoming training jobs and either
//! hands them to the mesh trainer or starts an HPC transfer. The pending
//! loop polls open transfers and advances each to exactly one terminal
//! envelope. Open transfers live on the pending topic itself; the
//! durable log's round-trip is the retry delay, which makes the retry
//! state crash-safe for free.

/// Training-job classification.
pub mod classify;
/// Pending-transfer polling loop.
pub mod pending;
/// An in-memory transfer service double for tests.
pub mod stub;
/// Submission-intake loop.
pub mod submit;
/// The external transfer service client.
pub mod transfer;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use classify::{classify, ClassifierConfig};
pub use pending::{
    await_completion, run_pending_loop, CompletionOutcome, PendingHandler, PendingOutcome,
    DEFAULT_COMPLETION_TIMEOUT,
};
pub use stub::StubTransferApi;
pub use submit::{run_submission_loop, SubmissionHandler, SubmissionOutcome};
pub use transfer::{
    HttpTransferApi, TransferApi, TransferCredentials, TransferError, TransferInitiation,
    TransferOptions, TransferPoll, TransferRequest,
};

/// Terminal failure tag: the transfer never got started.
pub const REASON_INITIATION_FAILED: &str = "transfer-initiation-failed";
/// Terminal failure tag: the service reported the transfer failed.
pub const REASON_TRANSFER_FAILED: &str = "transfer-failed";
/// Terminal failure tag: the transfer was cancelled.
pub const REASON_TRANSFER_CANCELED: &str = "transfer-canceled";

/// Durable group identity of the submission consumer.
pub const SUBMISSION_GROUP: &str = "arcnet-bridge-submit";
/// Durable group identity of the pending consumer.
pub const PENDING_GROUP: &str = "arcnet-bridge-pending";

/// Bridge policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Classifier policy.
    pub classifier: ClassifierConfig,
    /// Source endpoint handed to the transfer service.
    pub source_endpoint: String,
    /// Destination endpoint handed to the transfer service.
    pub dest_endpoint: String,
    /// Destination path prefix at the HPC facility.
    pub dest_path_prefix: String,
    /// Transfer submission options.
    pub transfer_options: TransferOptions,
    /// Attempts at starting a transfer before giving up.
    pub initiate_attempts: u32,
    /// Base delay of the initiation backoff (doubles per attempt).
    #[serde(with = "duration_millis")]
    pub initiate_backoff_base: Duration,
    /// Pause between pending-loop poll cycles; this is the back-pressure
    /// on the delay queue.
    #[serde(with = "duration_millis")]
    pub pending_poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            source_endpoint: "arcnet-mesh-staging".to_string(),
            dest_endpoint: "ornl-dtn".to_string(),
            dest_path_prefix: "/gpfs/arcnet/ingest".to_string(),
            transfer_options: TransferOptions::default(),
            initiate_attempts: 3,
            initiate_backoff_base: Duration::from_secs(1),
            pending_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Serde helper — `Duration` as integer milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        (val.as_millis() as u64).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}
