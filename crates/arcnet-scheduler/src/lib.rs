// SPDX-License-Identifier: MIT OR Apache-2.0
//! arcnet-scheduler
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The inference-request dispatcher.
//!
//! For each request: query the regional tier for available candidates in
//! the requester's zone, rank them, walk the ranking attempting to
//! reserve, and emit exactly one of dispatch / retry / rejected. Release
//! of a won reservation is the dispatch receiver's duty, not ours.

/// Candidate scoring and ranking.
pub mod score;

use arcnet_core::observe::{observed, OpMetrics};
use arcnet_core::{DispatchCommand, InferenceRequest, NodeDocument, GEOZONE_PREFIX_LEN};
use arcnet_state::{AvailabilityQuery, RegionalState, ReservationDenied};
use arcnet_transport::headers::keys;
use arcnet_transport::{
    run_handler_loop, topics, CancellationToken, Consumer, Headers, Producer, TransportError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use score::{rank, score, ScoringWeights};

/// Durable group identity of the scheduler's request consumer.
pub const SCHEDULER_GROUP: &str = "arcnet-scheduler";

/// Scheduler policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Battery floor passed to availability queries.
    pub min_battery: f64,
    /// Reservation attempts before giving up on a request.
    pub max_reserve_attempts: usize,
    /// TTL stamped on won reservations.
    #[serde(with = "duration_secs")]
    pub reservation_ttl: Duration,
    /// Retry budget granted to requests that arrive without one.
    pub default_retry_budget: u32,
    /// Scoring weights.
    pub weights: ScoringWeights,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_battery: 0.2,
            max_reserve_attempts: 5,
            reservation_ttl: Duration::from_secs(30),
            default_retry_budget: 3,
            weights: ScoringWeights::default(),
        }
    }
}

/// Serde helper — `Duration` as integer seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_secs().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs: u64 = u64::deserialize(de)?;
        Ok(Duration::from_secs(secs))
    }
}

/// What the scheduler did with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A node was reserved and a dispatch command emitted.
    Dispatched {
        /// The winning node.
        node_id: uuid::Uuid,
    },
    /// No node could be claimed; the request went to the retry topic.
    Retried {
        /// Budget remaining after the decrement.
        budget_left: u32,
    },
    /// The retry budget was exhausted; the request was rejected.
    Rejected,
}

/// The dispatcher: regional tier + producer + policy.
pub struct Scheduler {
    state: Arc<RegionalState>,
    producer: Producer,
    config: SchedulerConfig,
    metrics: OpMetrics,
}

impl Scheduler {
    /// Build a scheduler.
    #[must_use]
    pub fn new(state: Arc<RegionalState>, producer: Producer, config: SchedulerConfig) -> Self {
        Self {
            state,
            producer,
            config,
            metrics: OpMetrics::new(),
        }
    }

    /// Per-operation timings recorded so far.
    #[must_use]
    pub fn metrics(&self) -> &OpMetrics {
        &self.metrics
    }

    /// Schedule one request, emitting exactly one downstream message.
    pub async fn handle_request(
        &self,
        request: &InferenceRequest,
        headers: &Headers,
    ) -> Result<ScheduleOutcome, TransportError> {
        observed(&self.metrics, "schedule", self.schedule(request, headers)).await
    }

    async fn schedule(
        &self,
        request: &InferenceRequest,
        headers: &Headers,
    ) -> Result<ScheduleOutcome, TransportError> {
        let candidates = self.candidates(request);
        let ranked = rank(
            &self.config.weights,
            candidates,
            &request.requester_geozone,
        );

        let mut attempts = 0;
        for candidate in &ranked {
            if attempts >= self.config.max_reserve_attempts {
                break;
            }
            attempts += 1;
            match self.state.reserve(
                candidate.node_id,
                request.request_id,
                self.config.reservation_ttl,
            ) {
                Ok(_) => {
                    return self.dispatch(request, candidate, headers).await;
                }
                Err(ReservationDenied::AlreadyReserved | ReservationDenied::RaceCondition) => {
                    debug!(
                        request = %request.request_id,
                        node = %candidate.node_id,
                        "candidate contended, walking on"
                    );
                }
                Err(ReservationDenied::NodeNotFound) => {
                    debug!(
                        request = %request.request_id,
                        node = %candidate.node_id,
                        "candidate vanished, walking on"
                    );
                }
                Err(denied) => {
                    warn!(
                        request = %request.request_id,
                        node = %candidate.node_id,
                        denied = %denied,
                        "reservation attempt failed, walking on"
                    );
                }
            }
        }

        self.requeue(request, headers).await
    }

    /// Candidate set: available nodes in the requester's coarse zone.
    ///
    /// The query uses the three-character zone so the ranking still sees
    /// near-but-not-exact nodes; the scoring's geozone term then prefers
    /// exact-prefix matches.
    fn candidates(&self, request: &InferenceRequest) -> Vec<NodeDocument> {
        let zone_prefix: String = request
            .requester_geozone
            .chars()
            .take(GEOZONE_PREFIX_LEN)
            .collect();
        self.state.find_available(&AvailabilityQuery {
            geozone_prefix: zone_prefix,
            model_id: request.model_id.clone(),
            min_battery: self.config.min_battery,
            include_stale: false,
        })
    }

    async fn dispatch(
        &self,
        request: &InferenceRequest,
        node: &NodeDocument,
        headers: &Headers,
    ) -> Result<ScheduleOutcome, TransportError> {
        let command = DispatchCommand::new(request.request_id, node.node_id, Utc::now());
        let topic = topics::dispatch(&node.geozone_id);
        self.producer
            .send(
                &topic,
                &node.node_id.to_string(),
                &command,
                Some(headers),
                None,
            )
            .await?;
        info!(
            request = %request.request_id,
            node = %node.node_id,
            topic,
            "request dispatched"
        );
        Ok(ScheduleOutcome::Dispatched {
            node_id: node.node_id,
        })
    }

    /// No winner: retry while budget remains, reject when it is spent.
    async fn requeue(
        &self,
        request: &InferenceRequest,
        headers: &Headers,
    ) -> Result<ScheduleOutcome, TransportError> {
        let budget = headers
            .get(keys::RETRY_BUDGET)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(self.config.default_retry_budget);

        if budget == 0 {
            self.producer
                .send(
                    topics::REQUEST_REJECTED,
                    &request.request_id.to_string(),
                    request,
                    Some(headers),
                    None,
                )
                .await?;
            warn!(request = %request.request_id, "request rejected, budget exhausted");
            return Ok(ScheduleOutcome::Rejected);
        }

        let budget_left = budget - 1;
        let mut extra = Headers::new();
        extra.insert(keys::RETRY_BUDGET, budget_left.to_string());
        self.producer
            .send(
                topics::REQUEST_RETRY,
                &request.request_id.to_string(),
                request,
                Some(headers),
                Some(&extra),
            )
            .await?;
        info!(request = %request.request_id, budget_left, "request requeued for retry");
        Ok(ScheduleOutcome::Retried { budget_left })
    }
}

/// Consume the inference-request topic until cancelled.
///
/// Handler errors leave offsets uncommitted, so a request is never lost;
/// the emit-exactly-once property holds because every delivered request
/// takes exactly one of the three paths before the batch commits.
pub async fn run_scheduler(
    consumer: Consumer,
    scheduler: Arc<Scheduler>,
    token: CancellationToken,
) {
    run_handler_loop::<InferenceRequest, _, _, TransportError>(consumer, token, move |batch| {
        let scheduler = Arc::clone(&scheduler);
        async move {
            for delivery in &batch.deliveries {
                if let Some(request) = delivery.entity() {
                    scheduler
                        .handle_request(request, &delivery.headers)
                        .await?;
                }
            }
            Ok(())
        }
    })
    .await;
}
