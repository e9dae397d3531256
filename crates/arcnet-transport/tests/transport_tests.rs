// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end tests for the typed transport: framing, validation on both
//! edges, dead-letter routing, and the handler loop.

use arcnet_core::{EnergySource, Geohash, InferenceRequest, NodeTelemetry, WireEntity};
use arcnet_schema::{Frame, SchemaRegistry};
use arcnet_transport::headers::keys;
use arcnet_transport::{
    run_handler_loop, topics, CancellationToken, Consumer, DeliveryStatus, Headers, LogBus,
    Producer,
};
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn setup() -> (Arc<LogBus>, Arc<SchemaRegistry>, Producer) {
    let bus = Arc::new(LogBus::new());
    let registry = Arc::new(SchemaRegistry::with_builtin());
    let producer = Producer::new(Arc::clone(&bus), Arc::clone(&registry));
    (bus, registry, producer)
}

fn telemetry() -> NodeTelemetry {
    NodeTelemetry {
        node_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        geohash: Geohash::parse("9q8yyk").unwrap(),
        energy_source: EnergySource::Solar,
        battery_level: 0.9,
        gpu_utilization: 0.15,
        gpu_memory_free_gb: 40.0,
        models_loaded: vec!["llama-3.1-8b".into()],
        schema_version: NodeTelemetry::CURRENT_VERSION,
    }
}

// ---------------------------------------------------------------------------
// Produce / consume round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn typed_round_trip() {
    let (bus, registry, producer) = setup();
    let t = telemetry();
    producer
        .send(
            topics::TELEMETRY_NODES,
            &t.node_id.to_string(),
            &t,
            None,
            None,
        )
        .await
        .unwrap();

    let consumer = Consumer::new(bus, registry, topics::TELEMETRY_NODES, "state-tier");
    let batch = consumer
        .poll::<NodeTelemetry>(Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.deliveries.len(), 1);
    let got = batch.valid().next().unwrap();
    assert_eq!(got, &t);
}

#[tokio::test]
async fn headers_carry_entity_identity_and_trace() {
    let (bus, registry, producer) = setup();
    let t = telemetry();
    producer
        .send(
            topics::TELEMETRY_NODES,
            &t.node_id.to_string(),
            &t,
            None,
            None,
        )
        .await
        .unwrap();

    let consumer = Consumer::new(bus, registry, topics::TELEMETRY_NODES, "state-tier");
    let batch = consumer
        .poll::<NodeTelemetry>(Duration::from_millis(100))
        .await
        .unwrap();
    let headers = &batch.deliveries[0].headers;
    assert_eq!(headers.get(keys::ENTITY_TYPE), Some("node-telemetry"));
    assert_eq!(headers.get(keys::SCHEMA_VERSION), Some("2"));
    assert!(headers.get(keys::TRACE_ID).is_some());
    assert!(headers.get(keys::SPAN_ID).is_some());
}

#[tokio::test]
async fn trace_id_propagates_through_parent_headers() {
    let (bus, registry, producer) = setup();
    let mut parent = Headers::child_of(None);
    parent.insert(keys::TRACE_ID, "cafe".repeat(8));
    let t = telemetry();
    producer
        .send(
            topics::TELEMETRY_NODES,
            &t.node_id.to_string(),
            &t,
            Some(&parent),
            None,
        )
        .await
        .unwrap();

    let consumer = Consumer::new(bus, registry, topics::TELEMETRY_NODES, "g");
    let batch = consumer
        .poll::<NodeTelemetry>(Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(
        batch.deliveries[0].headers.get(keys::TRACE_ID),
        Some("cafe".repeat(8).as_str())
    );
}

#[tokio::test]
async fn outbound_validation_fails_fast() {
    let (_bus, _registry, producer) = setup();
    let mut t = telemetry();
    t.battery_level = 2.0;
    let err = producer
        .send(
            topics::TELEMETRY_NODES,
            &t.node_id.to_string(),
            &t,
            None,
            None,
        )
        .await;
    assert!(err.is_err());
    assert_eq!(producer.bus().topic_len(topics::TELEMETRY_NODES), 0);
}

// ---------------------------------------------------------------------------
// Migration on consume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn v1_telemetry_migrates_on_consume() {
    let (bus, registry, producer) = setup();
    let payload = json!({
        "node_id": Uuid::new_v4().to_string(),
        "timestamp": "2026-03-01T12:00:00Z",
        "geohash": "9q8yyk",
        "energy_source": "SOLAR",
        "battery_level": 0.5,
        "gpu_utilization": 0.5,
        "gpu_memory_free_gb": 8.0,
        "models_loaded": [],
        "schema_version": 1,
    });
    let frame = Frame::new(
        arcnet_core::EntityKind::NodeTelemetry,
        1,
        serde_json::to_vec(&payload).unwrap(),
    );
    producer
        .send_raw(topics::TELEMETRY_NODES, "n1", frame.encode(), Headers::new())
        .unwrap();

    let consumer = Consumer::new(bus, registry, topics::TELEMETRY_NODES, "g");
    let batch = consumer
        .poll::<NodeTelemetry>(Duration::from_millis(100))
        .await
        .unwrap();
    let t = batch.valid().next().expect("v1 record should migrate");
    assert_eq!(t.energy_source, EnergySource::Solar);
    assert_eq!(t.schema_version, NodeTelemetry::CURRENT_VERSION);
}

// ---------------------------------------------------------------------------
// Dead-letter routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_payload_dead_letters_with_diagnostics() {
    let (bus, registry, producer) = setup();
    // Malformed on three axes, mirroring a hostile client.
    let payload = json!({
        "request_id": "not-a-uuid",
        "model_id": "llama-3.1-8b",
        "context_window_tokens": 8192,
        "priority": "invalid",
        "max_latency_ms": -100,
        "requester_geozone": "9q8",
        "schema_version": 2,
    });
    let frame = Frame::new(
        arcnet_core::EntityKind::InferenceRequest,
        2,
        serde_json::to_vec(&payload).unwrap(),
    );
    producer
        .send_raw(
            topics::REQUEST_INFERENCE,
            "not-a-uuid",
            frame.encode(),
            Headers::new(),
        )
        .unwrap();

    let consumer = Consumer::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        topics::REQUEST_INFERENCE,
        "scheduler",
    );
    let batch = consumer
        .poll::<InferenceRequest>(Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.deliveries.len(), 1);
    assert!(matches!(
        batch.deliveries[0].status,
        DeliveryStatus::Invalid { .. }
    ));

    // Exactly one record on the dead-letter mirror, carrying the
    // original payload and the diagnostic headers.
    let dl_topic = topics::dead_letter(topics::REQUEST_INFERENCE);
    assert_eq!(bus.topic_len(&dl_topic), 1);
    let dl_consumer = Consumer::new(bus, registry, dl_topic.clone(), "operators");
    let raw = dl_consumer
        .poll_raw(Duration::from_millis(100))
        .await
        .unwrap();
    let record = &raw[0];
    assert_eq!(
        record.headers.get(keys::ORIGINAL_TOPIC),
        Some(topics::REQUEST_INFERENCE)
    );
    assert!(record.headers.get(keys::ORIGINAL_OFFSET).is_some());
    assert!(record.headers.get(keys::ERROR).is_some());
    assert_eq!(record.key, "not-a-uuid");
    assert_eq!(record.payload, frame.encode());
}

#[tokio::test]
async fn garbage_bytes_dead_letter_too() {
    let (bus, registry, producer) = setup();
    producer
        .send_raw(
            topics::REQUEST_INFERENCE,
            "k",
            b"not a frame at all".to_vec(),
            Headers::new(),
        )
        .unwrap();

    let consumer = Consumer::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        topics::REQUEST_INFERENCE,
        "scheduler",
    );
    let batch = consumer
        .poll::<InferenceRequest>(Duration::from_millis(100))
        .await
        .unwrap();
    assert!(matches!(
        batch.deliveries[0].status,
        DeliveryStatus::Invalid { .. }
    ));
    assert_eq!(
        bus.topic_len(&topics::dead_letter(topics::REQUEST_INFERENCE)),
        1
    );
}

// ---------------------------------------------------------------------------
// Handler loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handler_loop_commits_on_success() {
    let (bus, registry, producer) = setup();
    let t = telemetry();
    producer
        .send(
            topics::TELEMETRY_NODES,
            &t.node_id.to_string(),
            &t,
            None,
            None,
        )
        .await
        .unwrap();

    let consumer = Consumer::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        topics::TELEMETRY_NODES,
        "g",
    );
    let token = CancellationToken::new();
    let seen = Arc::new(AtomicUsize::new(0));

    let loop_seen = Arc::clone(&seen);
    let loop_token = token.clone();
    let handle = tokio::spawn(run_handler_loop::<NodeTelemetry, _, _, String>(
        consumer,
        loop_token,
        move |batch| {
            let seen = Arc::clone(&loop_seen);
            async move {
                seen.fetch_add(batch.deliveries.len(), Ordering::SeqCst);
                Ok(())
            }
        },
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    handle.await.unwrap();

    // One record, delivered exactly once because the loop committed.
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_loop_redelivers_on_failure() {
    let (bus, registry, producer) = setup();
    let t = telemetry();
    producer
        .send(
            topics::TELEMETRY_NODES,
            &t.node_id.to_string(),
            &t,
            None,
            None,
        )
        .await
        .unwrap();

    let consumer = Consumer::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        topics::TELEMETRY_NODES,
        "g",
    );
    let token = CancellationToken::new();
    let attempts = Arc::new(AtomicUsize::new(0));

    let loop_attempts = Arc::clone(&attempts);
    let loop_token = token.clone();
    let handle = tokio::spawn(run_handler_loop::<NodeTelemetry, _, _, String>(
        consumer,
        loop_token,
        move |_batch| {
            let attempts = Arc::clone(&loop_attempts);
            async move {
                // Fail the first delivery; accept the redelivery.
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("transient".to_string())
                } else {
                    Ok(())
                }
            }
        },
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    token.cancel();
    handle.await.unwrap();

    assert!(attempts.load(Ordering::SeqCst) >= 2, "batch should redeliver");
}
