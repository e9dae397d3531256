// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tests for the aggregation ticker.

use arcnet_aggregator::{publish_summaries, run_aggregator};
use arcnet_core::{EnergySource, Geohash, NodeTelemetry, RegionalSummary, WireEntity};
use arcnet_schema::SchemaRegistry;
use arcnet_state::RegionalState;
use arcnet_transport::{topics, CancellationToken, Consumer, LogBus, Producer};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn telemetry(geohash: &str, energy: EnergySource) -> NodeTelemetry {
    NodeTelemetry {
        node_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        geohash: Geohash::parse(geohash).unwrap(),
        energy_source: energy,
        battery_level: 0.8,
        gpu_utilization: 0.3,
        gpu_memory_free_gb: 24.0,
        models_loaded: vec!["llama-3.1-8b".into()],
        schema_version: NodeTelemetry::CURRENT_VERSION,
    }
}

#[tokio::test]
async fn one_summary_per_geozone_keyed_by_zone() {
    let bus = Arc::new(LogBus::new());
    let registry = Arc::new(SchemaRegistry::with_builtin());
    let producer = Producer::new(Arc::clone(&bus), Arc::clone(&registry));
    let state = RegionalState::in_memory();
    state
        .ingest_batch(&[
            telemetry("9q8yyk", EnergySource::Solar),
            telemetry("9q8yyz", EnergySource::Grid),
            telemetry("dr5reg", EnergySource::Battery),
        ])
        .unwrap();

    let published = publish_summaries(&state, &producer).await;
    assert_eq!(published, 2);

    let consumer = Consumer::new(
        bus,
        registry,
        topics::TELEMETRY_REGIONAL_SUMMARY,
        "dashboard",
    );
    let batch = consumer
        .poll::<RegionalSummary>(Duration::from_millis(100))
        .await
        .unwrap();
    let mut zones: Vec<String> = batch
        .valid()
        .map(|s| s.geozone_id.as_str().to_string())
        .collect();
    zones.sort();
    assert_eq!(zones, vec!["9q8".to_string(), "dr5".to_string()]);

    let keys: Vec<&str> = batch.deliveries.iter().map(|d| d.key.as_str()).collect();
    assert!(keys.contains(&"9q8"));
    assert!(keys.contains(&"dr5"));
}

#[tokio::test]
async fn summary_counts_energy_sources_and_availability() {
    let bus = Arc::new(LogBus::new());
    let registry = Arc::new(SchemaRegistry::with_builtin());
    let producer = Producer::new(Arc::clone(&bus), Arc::clone(&registry));
    let state = RegionalState::in_memory();
    state
        .ingest_batch(&[telemetry("9q8yyk", EnergySource::Solar)])
        .unwrap();

    publish_summaries(&state, &producer).await;

    let consumer = Consumer::new(bus, registry, topics::TELEMETRY_REGIONAL_SUMMARY, "g");
    let batch = consumer
        .poll::<RegionalSummary>(Duration::from_millis(100))
        .await
        .unwrap();
    let summary = batch.valid().next().unwrap();
    assert_eq!(summary.energy_sources.get("solar"), Some(&1));
    assert_eq!(summary.active_nodes, 1);
    assert_eq!(summary.available_gpus, 1);
}

#[tokio::test]
async fn ticker_publishes_and_stops_on_cancel() {
    let bus = Arc::new(LogBus::new());
    let registry = Arc::new(SchemaRegistry::with_builtin());
    let producer = Producer::new(Arc::clone(&bus), Arc::clone(&registry));
    let state = Arc::new(RegionalState::in_memory());
    state
        .ingest_batch(&[telemetry("9q8yyk", EnergySource::Solar)])
        .unwrap();

    let token = CancellationToken::new();
    let handle = tokio::spawn(run_aggregator(
        Arc::clone(&state),
        producer,
        Duration::from_millis(20),
        token.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(120)).await;
    token.cancel();
    handle.await.unwrap();

    assert!(bus.topic_len(topics::TELEMETRY_REGIONAL_SUMMARY) >= 2);
}

#[tokio::test]
async fn empty_region_publishes_nothing_but_does_not_fail() {
    let bus = Arc::new(LogBus::new());
    let registry = Arc::new(SchemaRegistry::with_builtin());
    let producer = Producer::new(bus, registry);
    let state = RegionalState::in_memory();
    assert_eq!(publish_summaries(&state, &producer).await, 0);
}
