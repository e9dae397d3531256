// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios through the fully wired control plane: seeded
//! nodes, live workers, and assertions on what lands on which topic.

use arcnet_bridge::StubTransferApi;
use arcnet_core::{
    DispatchCommand, EnergySource, FailedJob, Geohash, InferenceRequest, NodeTelemetry, OrnlJob,
    PendingJob, Priority, TrainingJob, TransferStatus, WireEntity,
};
use arcnet_runtime::{MeshConfig, MeshRuntime};
use arcnet_schema::Frame;
use arcnet_transport::headers::keys;
use arcnet_transport::{topics, Consumer, Headers, LogBus};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A config with intervals tightened for test clocks.
fn test_config() -> MeshConfig {
    let mut config = MeshConfig::default();
    config.state.sweep_interval_secs = 1;
    config.bridge.initiate_backoff_base = Duration::from_millis(5);
    config.bridge.pending_poll_interval = Duration::from_millis(25);
    config.aggregator.interval_secs = 1;
    config
}

fn start_mesh(api: StubTransferApi) -> MeshRuntime {
    MeshRuntime::start_with_transfer(test_config(), Arc::new(api)).unwrap()
}

fn telemetry(geohash: &str, energy: EnergySource, battery: f64, util: f64) -> NodeTelemetry {
    NodeTelemetry {
        node_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        geohash: Geohash::parse(geohash).unwrap(),
        energy_source: energy,
        battery_level: battery,
        gpu_utilization: util,
        gpu_memory_free_gb: 40.0,
        models_loaded: vec!["llama-3.1-8b".into(), "llama-3.1-70b".into()],
        schema_version: NodeTelemetry::CURRENT_VERSION,
    }
}

fn inference_request(geozone: &str) -> InferenceRequest {
    InferenceRequest {
        request_id: Uuid::new_v4(),
        model_id: "llama-3.1-8b".to_string(),
        context_window_tokens: 8192,
        priority: Priority::Normal,
        max_latency_ms: 500,
        requester_geozone: geozone.to_string(),
        schema_version: InferenceRequest::CURRENT_VERSION,
    }
}

fn training_job(dataset_gb: f64, flops: f64) -> TrainingJob {
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

/// Wait until `topic` holds at least `n` records, within `timeout`.
async fn wait_for_topic(bus: &Arc<LogBus>, topic: &str, n: usize, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if bus.topic_len(topic) >= n {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bus.topic_len(topic) >= n
}

async fn read_topic<T: WireEntity + Clone>(mesh: &MeshRuntime, topic: &str) -> Vec<T> {
    let consumer = Consumer::new(
        Arc::clone(mesh.bus()),
        Arc::clone(mesh.registry()),
        topic,
        "scenario-reader",
    );
    let batch = consumer.poll::<T>(Duration::from_millis(100)).await.unwrap();
    batch.valid().cloned().collect()
}

// ---------------------------------------------------------------------------
// S1 — solar node wins
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn solar_node_wins_end_to_end() {
    let mesh = start_mesh(StubTransferApi::succeeding());

    // Ten nodes across geohashes; the winner-to-be is solar, charged,
    // and idle in the requester's hash.
    let solar = telemetry("9q8yyk", EnergySource::Solar, 0.9, 0.15);
    let mut seeds = vec![solar.clone()];
    for hash in [
        "9q8xbc", "9q8xbd", "9q9bbb", "dr5reg", "dr5reh", "gbsuv7", "gbsuv8", "u4pruy", "u4pruz",
    ] {
        seeds.push(telemetry(hash, EnergySource::Grid, 0.6, 0.5));
    }
    for t in &seeds {
        mesh.producer()
            .send(topics::TELEMETRY_NODES, &t.node_id.to_string(), t, None, None)
            .await
            .unwrap();
    }
    // Wait for ingestion before the request goes in.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while mesh.state().health().nodes < seeds.len() {
        assert!(tokio::time::Instant::now() < deadline, "ingestion stalled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let request = inference_request("9q8yyk");
    mesh.producer()
        .send(
            topics::REQUEST_INFERENCE,
            &request.request_id.to_string(),
            &request,
            None,
            None,
        )
        .await
        .unwrap();

    let dispatch_topic = topics::dispatch(&Geohash::parse("9q8yyk").unwrap().geozone());
    assert!(
        wait_for_topic(mesh.bus(), &dispatch_topic, 1, Duration::from_millis(500)).await,
        "dispatch should arrive within 500ms"
    );
    let commands: Vec<DispatchCommand> = read_topic(&mesh, &dispatch_topic).await;
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].node_id, solar.node_id);
    assert_eq!(commands[0].request_id, request.request_id);

    mesh.shutdown().await;
}

// ---------------------------------------------------------------------------
// S2 — reservation mutual exclusion (full taxonomy lives in
// arcnet-state; here the claim survives the wired mesh)
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reservations_exclude_through_the_wired_mesh() {
    let mesh = start_mesh(StubTransferApi::succeeding());
    let node = telemetry("9q8yyk", EnergySource::Solar, 0.9, 0.1);
    mesh.producer()
        .send(
            topics::TELEMETRY_NODES,
            &node.node_id.to_string(),
            &node,
            None,
            None,
        )
        .await
        .unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while mesh.state().health().nodes < 1 {
        assert!(tokio::time::Instant::now() < deadline, "ingestion stalled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let r1 = Uuid::new_v4();
    let r2 = Uuid::new_v4();
    mesh.state()
        .reserve(node.node_id, r1, Duration::from_secs(30))
        .unwrap();
    assert!(mesh
        .state()
        .reserve(node.node_id, r2, Duration::from_secs(30))
        .is_err());
    mesh.state().release(node.node_id, r1).unwrap();
    mesh.state()
        .reserve(node.node_id, r2, Duration::from_secs(30))
        .unwrap();

    mesh.shutdown().await;
}

// ---------------------------------------------------------------------------
// S3 — invalid message dead-letters
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_request_dead_letters_and_nothing_dispatches() {
    let mesh = start_mesh(StubTransferApi::succeeding());

    let payload = json!({
        "request_id": "not-a-uuid",
        "model_id": "llama-3.1-8b",
        "context_window_tokens": 8192,
        "priority": "invalid",
        "max_latency_ms": -100,
        "requester_geozone": "9q8yyk",
        "schema_version": 2,
    });
    let frame = Frame::new(
        arcnet_core::EntityKind::InferenceRequest,
        2,
        serde_json::to_vec(&payload).unwrap(),
    );
    mesh.producer()
        .send_raw(
            topics::REQUEST_INFERENCE,
            "not-a-uuid",
            frame.encode(),
            Headers::new(),
        )
        .unwrap();

    let dl_topic = topics::dead_letter(topics::REQUEST_INFERENCE);
    assert!(
        wait_for_topic(mesh.bus(), &dl_topic, 1, Duration::from_secs(2)).await,
        "dead letter should appear"
    );
    assert_eq!(mesh.bus().topic_len(&dl_topic), 1);

    // The dead-letter record carries the diagnostics.
    let consumer = Consumer::new(
        Arc::clone(mesh.bus()),
        Arc::clone(mesh.registry()),
        dl_topic,
        "operators",
    );
    let records = consumer.poll_raw(Duration::from_millis(100)).await.unwrap();
    let headers = &records[0].headers;
    assert_eq!(
        headers.get(keys::ORIGINAL_TOPIC),
        Some(topics::REQUEST_INFERENCE)
    );
    assert!(headers.get(keys::ERROR).is_some());

    // Nothing downstream for this id.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let dispatch_topic = topics::dispatch(&Geohash::parse("9q8yyk").unwrap().geozone());
    assert_eq!(mesh.bus().topic_len(&dispatch_topic), 0);
    assert_eq!(mesh.bus().topic_len(topics::REQUEST_RETRY), 0);

    mesh.shutdown().await;
}

// ---------------------------------------------------------------------------
// S4 — large job goes HPC
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn large_job_bridges_to_hpc_and_terminates_once() {
    let mesh = start_mesh(StubTransferApi::succeeding());

    let job = training_job(2000.0, 5.0e18);
    mesh.producer()
        .send(
            topics::JOB_SUBMISSION,
            &job.job_id.to_string(),
            &job,
            None,
            None,
        )
        .await
        .unwrap();

    assert!(
        wait_for_topic(mesh.bus(), topics::BRIDGE_PENDING, 1, Duration::from_secs(2)).await,
        "pending record should appear"
    );
    assert!(
        wait_for_topic(mesh.bus(), topics::ORNL_INGRESS, 1, Duration::from_secs(3)).await,
        "terminal OrnlJob should appear"
    );

    let ornl: Vec<OrnlJob> = read_topic(&mesh, topics::ORNL_INGRESS).await;
    assert_eq!(ornl.len(), 1);
    assert_eq!(ornl[0].pending.job.job_id, job.job_id);

    // Mesh trainer saw nothing; no failures were emitted.
    assert_eq!(mesh.bus().topic_len(topics::SCHEDULER_TRAINING), 0);
    assert_eq!(mesh.bus().topic_len(topics::BRIDGE_FAILED), 0);

    mesh.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_transfer_requeues_then_terminates_exactly_once() {
    let mesh = start_mesh(StubTransferApi::scripted(vec![
        TransferStatus::Pending,
        TransferStatus::Active,
        TransferStatus::Succeeded,
    ]));

    let job = training_job(2000.0, 5.0e18);
    mesh.producer()
        .send(
            topics::JOB_SUBMISSION,
            &job.job_id.to_string(),
            &job,
            None,
            None,
        )
        .await
        .unwrap();

    assert!(
        wait_for_topic(mesh.bus(), topics::ORNL_INGRESS, 1, Duration::from_secs(5)).await,
        "transfer should eventually succeed"
    );
    // Three poll rounds left two requeued pending records plus the
    // original, but exactly one terminal envelope.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mesh.bus().topic_len(topics::ORNL_INGRESS), 1);
    assert_eq!(mesh.bus().topic_len(topics::BRIDGE_FAILED), 0);
    assert!(mesh.bus().topic_len(topics::BRIDGE_PENDING) >= 3);

    let pending: Vec<PendingJob> = read_topic(&mesh, topics::BRIDGE_PENDING).await;
    assert!(pending.iter().any(|p| p.retry_count == 2));

    mesh.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_transfer_terminates_as_failed_job() {
    let mesh = start_mesh(StubTransferApi::scripted(vec![TransferStatus::Failed]));

    let job = training_job(2000.0, 5.0e18);
    mesh.producer()
        .send(
            topics::JOB_SUBMISSION,
            &job.job_id.to_string(),
            &job,
            None,
            None,
        )
        .await
        .unwrap();

    assert!(
        wait_for_topic(mesh.bus(), topics::BRIDGE_FAILED, 1, Duration::from_secs(3)).await,
        "terminal FailedJob should appear"
    );
    let failed: Vec<FailedJob> = read_topic(&mesh, topics::BRIDGE_FAILED).await;
    assert_eq!(failed[0].reason, "transfer-failed");
    assert_eq!(mesh.bus().topic_len(topics::ORNL_INGRESS), 0);

    mesh.shutdown().await;
}

// ---------------------------------------------------------------------------
// S5 — small job goes federated
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn small_job_routes_to_the_mesh_trainer() {
    let mesh = start_mesh(StubTransferApi::succeeding());

    let job = training_job(100.0, 1.0e15);
    mesh.producer()
        .send(
            topics::JOB_SUBMISSION,
            &job.job_id.to_string(),
            &job,
            None,
            None,
        )
        .await
        .unwrap();

    assert!(
        wait_for_topic(
            mesh.bus(),
            topics::SCHEDULER_TRAINING,
            1,
            Duration::from_secs(2)
        )
        .await,
        "federated hand-off should appear"
    );

    let consumer = Consumer::new(
        Arc::clone(mesh.bus()),
        Arc::clone(mesh.registry()),
        topics::SCHEDULER_TRAINING,
        "mesh-trainer",
    );
    let batch = consumer
        .poll::<TrainingJob>(Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.deliveries.len(), 1);
    assert_eq!(
        batch.deliveries[0].headers.get(keys::CLASSIFICATION_TARGET),
        Some("federated")
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mesh.bus().topic_len(topics::BRIDGE_PENDING), 0);

    mesh.shutdown().await;
}

// ---------------------------------------------------------------------------
// S6 — v1 telemetry migrates
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn v1_telemetry_migrates_and_counts_as_solar() {
    let mesh = start_mesh(StubTransferApi::succeeding());

    let node_id = Uuid::new_v4();
    let payload = json!({
        "node_id": node_id.to_string(),
        "timestamp": Utc::now().to_rfc3339(),
        "geohash": "9q8yyk",
        "energy_source": "solar",
        "battery_level": 0.7,
        "gpu_utilization": 0.2,
        "gpu_memory_free_gb": 16.0,
        "models_loaded": ["llama-3.1-8b"],
        "schema_version": 1,
    });
    let frame = Frame::new(
        arcnet_core::EntityKind::NodeTelemetry,
        1,
        serde_json::to_vec(&payload).unwrap(),
    );
    mesh.producer()
        .send_raw(
            topics::TELEMETRY_NODES,
            &node_id.to_string(),
            frame.encode(),
            Headers::new(),
        )
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while mesh.state().get(node_id).is_none() {
        assert!(tokio::time::Instant::now() < deadline, "ingestion stalled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let doc = mesh.state().get(node_id).unwrap().doc;
    assert_eq!(doc.energy_source, EnergySource::Solar);

    let counts = mesh.state().counts_by_energy();
    assert_eq!(counts.get(&EnergySource::Solar), Some(&1));

    // The aggregator's summary reflects it too.
    let summaries = mesh.state().summaries();
    let zone = summaries
        .iter()
        .find(|s| s.geozone_id.as_str() == "9q8")
        .unwrap();
    assert_eq!(zone.energy_sources.get("solar"), Some(&1));

    mesh.shutdown().await;
}
