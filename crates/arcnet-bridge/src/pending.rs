// SPDX-License-Identifier: MIT OR Apache-2.0
//! The pending loop.
//!
//! Consumes the pending topic, polls each open transfer once, and
//! either emits its terminal envelope or re-publishes the pending record
//! for another round. The loop sleeps between cycles; that interval is
//! the delay-queue period and the back-pressure on the transfer service.

use crate::classify::classify;
use crate::transfer::TransferApi;
use crate::{BridgeConfig, REASON_TRANSFER_CANCELED, REASON_TRANSFER_FAILED};
use arcnet_core::{FailedJob, OrnlJob, PendingJob, TransferStatus, WireEntity};
use arcnet_transport::{
    topics, CancellationToken, Consumer, Headers, Producer, TransportError,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the pending loop did with one open transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutcome {
    /// The transfer finished; an [`OrnlJob`] was published.
    Completed {
        /// Identity of the terminal record.
        ornl_job_id: Uuid,
    },
    /// The transfer failed or was cancelled; a [`FailedJob`] was
    /// published.
    Failed,
    /// Still moving (or the service was unsure); the record went back on
    /// the pending topic.
    Requeued {
        /// Poll attempts so far, including this one.
        retry_count: u32,
    },
}

/// The polling half of the bridge.
pub struct PendingHandler {
    producer: Producer,
    api: Arc<dyn TransferApi>,
    config: BridgeConfig,
}

impl PendingHandler {
    /// Build a pending handler.
    #[must_use]
    pub fn new(producer: Producer, api: Arc<dyn TransferApi>, config: BridgeConfig) -> Self {
        Self {
            producer,
            api,
            config,
        }
    }

    /// Poll one open transfer and advance it.
    pub async fn handle_pending(
        &self,
        pending: &PendingJob,
        headers: &Headers,
    ) -> Result<PendingOutcome, TransportError> {
        let poll = match self.api.poll(&pending.transfer_task_id).await {
            Ok(poll) => poll,
            Err(e) => {
                // A flaky poll is indistinguishable from "unknown":
                // requeue and let the next round try again.
                warn!(
                    pending = %pending.pending_id,
                    task = pending.transfer_task_id,
                    error = %e,
                    "transfer poll failed, requeueing"
                );
                return self.requeue(pending, headers).await;
            }
        };

        match poll.status {
            TransferStatus::Succeeded => {
                let ornl = OrnlJob {
                    ornl_job_id: Uuid::new_v4(),
                    pending: pending.clone(),
                    bytes_transferred: poll.bytes_transferred,
                    files_transferred: poll.files_transferred,
                    transfer_completed_at: Utc::now(),
                    classification: classify(&pending.job, &self.config.classifier),
                    schema_version: OrnlJob::CURRENT_VERSION,
                };
                self.producer
                    .send(
                        topics::ORNL_INGRESS,
                        &ornl.ornl_job_id.to_string(),
                        &ornl,
                        Some(headers),
                        None,
                    )
                    .await?;
                info!(
                    pending = %pending.pending_id,
                    bytes = poll.bytes_transferred,
                    files = poll.files_transferred,
                    "transfer succeeded"
                );
                Ok(PendingOutcome::Completed {
                    ornl_job_id: ornl.ornl_job_id,
                })
            }
            TransferStatus::Failed => {
                self.fail(pending, headers, REASON_TRANSFER_FAILED, &poll.nice_status)
                    .await
            }
            TransferStatus::Canceled => {
                self.fail(pending, headers, REASON_TRANSFER_CANCELED, &poll.nice_status)
                    .await
            }
            TransferStatus::Pending | TransferStatus::Active | TransferStatus::Unknown => {
                debug!(
                    pending = %pending.pending_id,
                    status = ?poll.status,
                    "transfer still open"
                );
                self.requeue(pending, headers).await
            }
        }
    }

    async fn fail(
        &self,
        pending: &PendingJob,
        headers: &Headers,
        reason: &str,
        nice_status: &Option<String>,
    ) -> Result<PendingOutcome, TransportError> {
        let failed = FailedJob {
            failed_id: Uuid::new_v4(),
            job: pending.job.clone(),
            reason: reason.to_string(),
            error: nice_status.clone().unwrap_or_else(|| reason.to_string()),
            failed_at: Utc::now(),
            schema_version: FailedJob::CURRENT_VERSION,
        };
        self.producer
            .send(
                topics::BRIDGE_FAILED,
                &failed.failed_id.to_string(),
                &failed,
                Some(headers),
                None,
            )
            .await?;
        warn!(pending = %pending.pending_id, reason, "transfer failed terminally");
        Ok(PendingOutcome::Failed)
    }

    async fn requeue(
        &self,
        pending: &PendingJob,
        headers: &Headers,
    ) -> Result<PendingOutcome, TransportError> {
        let mut next = pending.clone();
        next.retry_count += 1;
        self.producer
            .send(
                topics::BRIDGE_PENDING,
                &next.pending_id.to_string(),
                &next,
                Some(headers),
                None,
            )
            .await?;
        Ok(PendingOutcome::Requeued {
            retry_count: next.retry_count,
        })
    }
}

/// Consume the pending topic until cancelled, sleeping
/// `pending_poll_interval` between cycles.
pub async fn run_pending_loop(
    consumer: Consumer,
    handler: Arc<PendingHandler>,
    token: CancellationToken,
) {
    let interval = handler.config.pending_poll_interval;
    info!(
        interval_ms = interval.as_millis() as u64,
        "pending loop started"
    );
    loop {
        let batch = tokio::select! {
            () = token.cancelled() => break,
            polled = consumer.poll::<PendingJob>(Duration::from_millis(250)) => polled,
        };
        match batch {
            Ok(batch) if batch.is_empty() => {}
            Ok(batch) => {
                let mut ok = true;
                for delivery in &batch.deliveries {
                    if let Some(pending) = delivery.entity() {
                        if let Err(e) = handler.handle_pending(pending, &delivery.headers).await {
                            warn!(error = %e, "pending handler failed, batch will redeliver");
                            ok = false;
                            break;
                        }
                    }
                }
                if ok {
                    consumer.commit(&batch);
                }
            }
            Err(e) => {
                warn!(error = %e, "pending poll failed");
            }
        }
        // The delay-queue period: nothing gets re-polled faster than
        // this.
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    info!("pending loop stopped");
}

/// Default deadline for [`await_completion`].
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(3600);

/// How [`await_completion`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The transfer reached a terminal status.
    Terminal(crate::TransferPoll),
    /// The deadline passed first; carries the last observed substate.
    TimedOut {
        /// The most recent substate seen before the deadline.
        last: TransferStatus,
    },
}

/// Drive `poll` until the transfer terminates or `timeout` passes.
///
/// A convenience for callers that want a synchronous-looking bound on a
/// transfer (the bridge loops never use it; they go through the topic).
pub async fn await_completion(
    api: &dyn TransferApi,
    task_id: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<CompletionOutcome, crate::TransferError> {
    let deadline = Instant::now() + timeout;
    let mut last = TransferStatus::Unknown;
    loop {
        let poll = api.poll(task_id).await?;
        if poll.status.is_terminal() {
            return Ok(CompletionOutcome::Terminal(poll));
        }
        last = poll.status;
        if Instant::now() + poll_interval > deadline {
            return Ok(CompletionOutcome::TimedOut { last });
        }
        tokio::time::sleep(poll_interval).await;
    }
}
