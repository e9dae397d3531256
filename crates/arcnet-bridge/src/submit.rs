// SPDX-License-Identifier: MIT OR Apache-2.0
//! The submission loop.
//!
//! Consumes the job-submission topic. Federated jobs go straight to the
//! mesh trainer with classification headers; HPC jobs get a transfer
//! started with bounded retry, then a pending record on the pending
//! topic, or a terminal failure when the service will not take them.

use crate::classify::classify;
use crate::transfer::{TransferApi, TransferRequest};
use crate::{BridgeConfig, REASON_INITIATION_FAILED};
use arcnet_core::{
    Classification, ClassificationTarget, FailedJob, PendingJob, PendingStatus, TrainingJob,
    WireEntity,
};
use arcnet_transport::headers::keys;
use arcnet_transport::{
    run_handler_loop, topics, CancellationToken, Consumer, Headers, Producer, TransportError,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What the submission loop did with one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Routed to the mesh trainer.
    FederatedRouted,
    /// A transfer was started and a pending record published.
    PendingCreated {
        /// Identity of the pending record.
        pending_id: Uuid,
    },
    /// The transfer service refused repeatedly; a terminal failure was
    /// published.
    Failed,
}

/// The submission half of the bridge.
pub struct SubmissionHandler {
    producer: Producer,
    api: Arc<dyn TransferApi>,
    config: BridgeConfig,
}

impl SubmissionHandler {
    /// Build a submission handler.
    #[must_use]
    pub fn new(producer: Producer, api: Arc<dyn TransferApi>, config: BridgeConfig) -> Self {
        Self {
            producer,
            api,
            config,
        }
    }

    /// Route one job, emitting exactly one downstream message.
    pub async fn handle_submission(
        &self,
        job: &TrainingJob,
        headers: &Headers,
    ) -> Result<SubmissionOutcome, TransportError> {
        let classification = classify(job, &self.config.classifier);
        info!(
            job = %job.job_id,
            target = %classification.target,
            reason = %classification.reason,
            "job classified"
        );
        match classification.target {
            ClassificationTarget::Federated => {
                self.route_federated(job, &classification, headers).await
            }
            ClassificationTarget::Hpc => self.route_hpc(job, headers).await,
        }
    }

    async fn route_federated(
        &self,
        job: &TrainingJob,
        classification: &Classification,
        headers: &Headers,
    ) -> Result<SubmissionOutcome, TransportError> {
        let mut extra = Headers::new();
        extra.insert(
            keys::CLASSIFICATION_TARGET,
            classification.target.to_string(),
        );
        extra.insert(
            keys::CLASSIFICATION_REASON,
            classification.reason.as_str(),
        );
        self.producer
            .send(
                topics::SCHEDULER_TRAINING,
                &job.job_id.to_string(),
                job,
                Some(headers),
                Some(&extra),
            )
            .await?;
        Ok(SubmissionOutcome::FederatedRouted)
    }

    async fn route_hpc(
        &self,
        job: &TrainingJob,
        headers: &Headers,
    ) -> Result<SubmissionOutcome, TransportError> {
        let request = TransferRequest {
            source_endpoint: self.config.source_endpoint.clone(),
            dest_endpoint: self.config.dest_endpoint.clone(),
            source_path: job.dataset_uri.clone(),
            dest_path: format!("{}/{}", self.config.dest_path_prefix, job.job_id),
            options: self.config.transfer_options.clone(),
        };

        let mut last_error = String::new();
        for attempt in 0..self.config.initiate_attempts {
            if attempt > 0 {
                let delay = self.config.initiate_backoff_base * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
            match self.api.initiate(&request).await {
                Ok(accepted) => {
                    let pending = PendingJob {
                        pending_id: Uuid::new_v4(),
                        job: job.clone(),
                        transfer_task_id: accepted.task_id,
                        destination_path: request.dest_path.clone(),
                        submitted_at: Utc::now(),
                        retry_count: 0,
                        status: PendingStatus::Transferring,
                        schema_version: PendingJob::CURRENT_VERSION,
                    };
                    self.producer
                        .send(
                            topics::BRIDGE_PENDING,
                            &pending.pending_id.to_string(),
                            &pending,
                            Some(headers),
                            None,
                        )
                        .await?;
                    info!(
                        job = %job.job_id,
                        pending = %pending.pending_id,
                        task = pending.transfer_task_id,
                        "transfer started"
                    );
                    return Ok(SubmissionOutcome::PendingCreated {
                        pending_id: pending.pending_id,
                    });
                }
                Err(e) => {
                    warn!(
                        job = %job.job_id,
                        attempt = attempt + 1,
                        error = %e,
                        "transfer initiation failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        let failed = FailedJob {
            failed_id: Uuid::new_v4(),
            job: job.clone(),
            reason: REASON_INITIATION_FAILED.to_string(),
            error: last_error,
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
        warn!(job = %job.job_id, "job failed terminally: initiation exhausted");
        Ok(SubmissionOutcome::Failed)
    }
}

/// Consume the job-submission topic until cancelled.
pub async fn run_submission_loop(
    consumer: Consumer,
    handler: Arc<SubmissionHandler>,
    token: CancellationToken,
) {
    run_handler_loop::<TrainingJob, _, _, TransportError>(consumer, token, move |batch| {
        let handler = Arc::clone(&handler);
        async move {
            for delivery in &batch.deliveries {
                if let Some(job) = delivery.entity() {
                    handler.handle_submission(job, &delivery.headers).await?;
                }
            }
            Ok(())
        }
    })
    .await;
}
