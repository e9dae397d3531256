// SPDX-License-Identifier: MIT OR Apache-2.0
//! Telemetry ingestion worker.
//!
//! All valid telemetries in a poll cycle are applied in one store
//! transaction. A failed transaction leaves offsets uncommitted and the
//! bus redelivers; invalid records were already dead-lettered by the
//! transport before the handler saw them.

use crate::{RegionalState, StoreError};
use arcnet_core::NodeTelemetry;
use arcnet_transport::{run_handler_loop, CancellationToken, Consumer};
use std::sync::Arc;
use tracing::debug;

/// Durable group identity of the state tier's telemetry consumer.
pub const INGEST_GROUP: &str = "arcnet-state-ingest";

/// Consume the telemetry topic into the store until cancelled.
pub async fn run_ingestion(
    consumer: Consumer,
    state: Arc<RegionalState>,
    token: CancellationToken,
) {
    run_handler_loop::<NodeTelemetry, _, _, StoreError>(consumer, token, move |batch| {
        let state = Arc::clone(&state);
        async move {
            let samples: Vec<NodeTelemetry> = batch.valid().cloned().collect();
            if samples.is_empty() {
                return Ok(());
            }
            let applied = state.ingest_batch(&samples)?;
            debug!(applied, "telemetry poll cycle applied");
            Ok(())
        }
    })
    .await;
}
