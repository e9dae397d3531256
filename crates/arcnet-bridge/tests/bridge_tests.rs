// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tests for the orchestrator halves: submission routing, transfer
//! initiation retry, and the pending state machine.

use arcnet_bridge::{
    BridgeConfig, PendingHandler, PendingOutcome, StubTransferApi, SubmissionHandler,
    SubmissionOutcome, TransferApi, REASON_INITIATION_FAILED, REASON_TRANSFER_CANCELED,
    REASON_TRANSFER_FAILED,
};
use arcnet_core::{
    FailedJob, OrnlJob, PendingJob, TrainingJob, TransferStatus, WireEntity,
};
use arcnet_schema::SchemaRegistry;
use arcnet_transport::headers::keys;
use arcnet_transport::{topics, Consumer, Headers, LogBus, Producer};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Fixture {
    bus: Arc<LogBus>,
    registry: Arc<SchemaRegistry>,
    api: Arc<StubTransferApi>,
    submit: SubmissionHandler,
    pending: PendingHandler,
}

fn fixture(api: StubTransferApi) -> Fixture {
    let bus = Arc::new(LogBus::new());
    let registry = Arc::new(SchemaRegistry::with_builtin());
    let producer = Producer::new(Arc::clone(&bus), Arc::clone(&registry));
    let api = Arc::new(api);
    let mut config = BridgeConfig::default();
    // Keep retry sleeps out of the test clock.
    config.initiate_backoff_base = Duration::from_millis(5);
    let submit = SubmissionHandler::new(
        producer.clone(),
        Arc::clone(&api) as Arc<dyn arcnet_bridge::TransferApi>,
        config.clone(),
    );
    let pending = PendingHandler::new(
        producer,
        Arc::clone(&api) as Arc<dyn arcnet_bridge::TransferApi>,
        config,
    );
    Fixture {
        bus,
        registry,
        api,
        submit,
        pending,
    }
}

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

async fn read_topic<T: arcnet_core::WireEntity + Clone>(f: &Fixture, topic: &str) -> Vec<T> {
    let consumer = Consumer::new(
        Arc::clone(&f.bus),
        Arc::clone(&f.registry),
        topic,
        "test-reader",
    );
    let batch = consumer.poll::<T>(Duration::from_millis(100)).await.unwrap();
    batch.valid().cloned().collect()
}

// ---------------------------------------------------------------------------
// Submission routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn large_job_starts_a_transfer() {
    let f = fixture(StubTransferApi::succeeding());
    let j = job(2000.0, 5.0e18);
    let outcome = f
        .submit
        .handle_submission(&j, &Headers::child_of(None))
        .await
        .unwrap();
    assert!(matches!(outcome, SubmissionOutcome::PendingCreated { .. }));

    let pending: Vec<PendingJob> = read_topic(&f, topics::BRIDGE_PENDING).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job.job_id, j.job_id);
    assert_eq!(pending[0].retry_count, 0);

    // Nothing went to the mesh trainer.
    assert_eq!(f.bus.topic_len(topics::SCHEDULER_TRAINING), 0);
}

#[tokio::test]
async fn small_job_routes_federated_with_headers() {
    let f = fixture(StubTransferApi::succeeding());
    let j = job(100.0, 1.0e15);
    let outcome = f
        .submit
        .handle_submission(&j, &Headers::child_of(None))
        .await
        .unwrap();
    assert_eq!(outcome, SubmissionOutcome::FederatedRouted);

    let consumer = Consumer::new(
        Arc::clone(&f.bus),
        Arc::clone(&f.registry),
        topics::SCHEDULER_TRAINING,
        "test-reader",
    );
    let batch = consumer
        .poll::<TrainingJob>(Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.deliveries.len(), 1);
    let headers = &batch.deliveries[0].headers;
    assert_eq!(headers.get(keys::CLASSIFICATION_TARGET), Some("federated"));
    assert_eq!(headers.get(keys::CLASSIFICATION_REASON), Some("default"));

    assert_eq!(f.bus.topic_len(topics::BRIDGE_PENDING), 0);
}

#[tokio::test]
async fn initiation_retries_then_succeeds() {
    let f = fixture(StubTransferApi::succeeding());
    f.api.fail_next_initiations(2);
    let j = job(2000.0, 5.0e18);
    let outcome = f
        .submit
        .handle_submission(&j, &Headers::child_of(None))
        .await
        .unwrap();
    assert!(matches!(outcome, SubmissionOutcome::PendingCreated { .. }));
}

#[tokio::test]
async fn initiation_exhaustion_is_terminal() {
    let f = fixture(StubTransferApi::succeeding());
    f.api.fail_next_initiations(3);
    let j = job(2000.0, 5.0e18);
    let outcome = f
        .submit
        .handle_submission(&j, &Headers::child_of(None))
        .await
        .unwrap();
    assert_eq!(outcome, SubmissionOutcome::Failed);

    let failed: Vec<FailedJob> = read_topic(&f, topics::BRIDGE_FAILED).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, REASON_INITIATION_FAILED);
    assert_eq!(failed[0].job.job_id, j.job_id);
    assert_eq!(f.bus.topic_len(topics::BRIDGE_PENDING), 0);
}

// ---------------------------------------------------------------------------
// Pending state machine
// ---------------------------------------------------------------------------

async fn seeded_pending(f: &Fixture) -> PendingJob {
    let j = job(2000.0, 5.0e18);
    f.submit
        .handle_submission(&j, &Headers::child_of(None))
        .await
        .unwrap();
    let mut pending: Vec<PendingJob> = read_topic(f, topics::BRIDGE_PENDING).await;
    pending.pop().unwrap()
}

#[tokio::test]
async fn succeeded_transfer_emits_one_ornl_job() {
    let f = fixture(StubTransferApi::succeeding());
    let p = seeded_pending(&f).await;

    let outcome = f
        .pending
        .handle_pending(&p, &Headers::child_of(None))
        .await
        .unwrap();
    assert!(matches!(outcome, PendingOutcome::Completed { .. }));

    let ornl: Vec<OrnlJob> = read_topic(&f, topics::ORNL_INGRESS).await;
    assert_eq!(ornl.len(), 1);
    assert_eq!(ornl[0].pending.pending_id, p.pending_id);
    assert!(ornl[0].bytes_transferred > 0);
    assert_eq!(
        ornl[0].classification.target,
        arcnet_core::ClassificationTarget::Hpc
    );
    assert_eq!(f.bus.topic_len(topics::BRIDGE_FAILED), 0);
}

#[tokio::test]
async fn failed_transfer_emits_one_failed_job() {
    let f = fixture(StubTransferApi::scripted(vec![TransferStatus::Failed]));
    let p = seeded_pending(&f).await;

    let outcome = f
        .pending
        .handle_pending(&p, &Headers::child_of(None))
        .await
        .unwrap();
    assert_eq!(outcome, PendingOutcome::Failed);

    let failed: Vec<FailedJob> = read_topic(&f, topics::BRIDGE_FAILED).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, REASON_TRANSFER_FAILED);
    assert_eq!(f.bus.topic_len(topics::ORNL_INGRESS), 0);
}

#[tokio::test]
async fn canceled_transfer_emits_one_failed_job() {
    let f = fixture(StubTransferApi::scripted(vec![TransferStatus::Canceled]));
    let p = seeded_pending(&f).await;

    f.pending
        .handle_pending(&p, &Headers::child_of(None))
        .await
        .unwrap();
    let failed: Vec<FailedJob> = read_topic(&f, topics::BRIDGE_FAILED).await;
    assert_eq!(failed[0].reason, REASON_TRANSFER_CANCELED);
}

#[tokio::test]
async fn open_transfer_requeues_with_bumped_retry_count() {
    let f = fixture(StubTransferApi::scripted(vec![
        TransferStatus::Pending,
        TransferStatus::Active,
        TransferStatus::Succeeded,
    ]));
    let p = seeded_pending(&f).await;

    let first = f
        .pending
        .handle_pending(&p, &Headers::child_of(None))
        .await
        .unwrap();
    assert_eq!(first, PendingOutcome::Requeued { retry_count: 1 });

    // The requeued record is a fresh message on the pending topic.
    let requeued: Vec<PendingJob> = read_topic(&f, topics::BRIDGE_PENDING).await;
    let latest = requeued.last().unwrap();
    assert_eq!(latest.retry_count, 1);
    assert_eq!(latest.pending_id, p.pending_id);

    let second = f
        .pending
        .handle_pending(latest, &Headers::child_of(None))
        .await
        .unwrap();
    assert_eq!(second, PendingOutcome::Requeued { retry_count: 2 });

    let third_input: Vec<PendingJob> = read_topic(&f, topics::BRIDGE_PENDING).await;
    let third = f
        .pending
        .handle_pending(third_input.last().unwrap(), &Headers::child_of(None))
        .await
        .unwrap();
    assert!(matches!(third, PendingOutcome::Completed { .. }));

    // Exactly one terminal envelope despite three rounds.
    assert_eq!(f.bus.topic_len(topics::ORNL_INGRESS), 1);
    assert_eq!(f.bus.topic_len(topics::BRIDGE_FAILED), 0);
}

// ---------------------------------------------------------------------------
// Bounded completion helper
// ---------------------------------------------------------------------------

#[tokio::test]
async fn await_completion_drives_to_terminal() {
    let api = StubTransferApi::scripted(vec![
        TransferStatus::Pending,
        TransferStatus::Active,
        TransferStatus::Succeeded,
    ]);
    let accepted = api
        .initiate(&arcnet_bridge::TransferRequest {
            source_endpoint: "src".into(),
            dest_endpoint: "dst".into(),
            source_path: "/a".into(),
            dest_path: "/b".into(),
            options: arcnet_bridge::TransferOptions::default(),
        })
        .await
        .unwrap();

    let outcome = arcnet_bridge::await_completion(
        &api,
        &accepted.task_id,
        Duration::from_secs(5),
        Duration::from_millis(5),
    )
    .await
    .unwrap();
    match outcome {
        arcnet_bridge::CompletionOutcome::Terminal(poll) => {
            assert_eq!(poll.status, TransferStatus::Succeeded);
        }
        other => panic!("expected terminal, got {other:?}"),
    }
    assert_eq!(api.polls(&accepted.task_id), 3);
}

#[tokio::test]
async fn await_completion_times_out_with_last_substate() {
    let api = StubTransferApi::scripted(vec![TransferStatus::Active]);
    let accepted = api
        .initiate(&arcnet_bridge::TransferRequest {
            source_endpoint: "src".into(),
            dest_endpoint: "dst".into(),
            source_path: "/a".into(),
            dest_path: "/b".into(),
            options: arcnet_bridge::TransferOptions::default(),
        })
        .await
        .unwrap();

    let outcome = arcnet_bridge::await_completion(
        &api,
        &accepted.task_id,
        Duration::from_millis(30),
        Duration::from_millis(10),
    )
    .await
    .unwrap();
    assert_eq!(
        outcome,
        arcnet_bridge::CompletionOutcome::TimedOut {
            last: TransferStatus::Active
        }
    );
}

#[tokio::test]
async fn unknown_status_is_transient() {
    let f = fixture(StubTransferApi::scripted(vec![
        TransferStatus::Unknown,
        TransferStatus::Succeeded,
    ]));
    let p = seeded_pending(&f).await;

    let outcome = f
        .pending
        .handle_pending(&p, &Headers::child_of(None))
        .await
        .unwrap();
    assert!(matches!(outcome, PendingOutcome::Requeued { .. }));
}
