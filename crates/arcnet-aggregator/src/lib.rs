// SPDX-License-Identifier: MIT OR Apache-2.0
//! arcnet-aggregator
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The regional aggregation ticker.
//!
//! Reads the state tier every interval and publishes one
//! `RegionalSummary` per geozone, keyed by geozone id. Failure to
//! compute or publish a tick is logged and the ticker continues; a
//! missing summary is strictly less bad than a dead aggregator.

use arcnet_state::RegionalState;
use arcnet_transport::{topics, CancellationToken, Producer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default tick interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Compute and publish one round of summaries. Returns how many were
/// published.
pub async fn publish_summaries(state: &RegionalState, producer: &Producer) -> usize {
    let health = state.health();
    if !health.healthy {
        warn!("state tier unhealthy, skipping aggregation tick");
        return 0;
    }

    let summaries = state.summaries();
    let mut published = 0;
    for summary in summaries {
        let key = summary.geozone_id.as_str().to_string();
        match producer
            .send(
                topics::TELEMETRY_REGIONAL_SUMMARY,
                &key,
                &summary,
                None,
                None,
            )
            .await
        {
            Ok(_) => published += 1,
            Err(e) => {
                warn!(geozone = key, error = %e, "failed to publish summary");
            }
        }
    }
    debug!(published, "aggregation tick complete");
    published
}

/// Run the aggregation ticker until cancelled.
pub async fn run_aggregator(
    state: Arc<RegionalState>,
    producer: Producer,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(interval_secs = interval.as_secs(), "aggregator started");
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                publish_summaries(&state, &producer).await;
            }
        }
    }
    info!("aggregator stopped");
}
