// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle tests for the wired runtime.

use arcnet_bridge::StubTransferApi;
use arcnet_runtime::{MeshConfig, MeshRuntime, RuntimeError};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn starts_and_shuts_down_cleanly() {
    let mesh =
        MeshRuntime::start_with_transfer(MeshConfig::default(), Arc::new(StubTransferApi::succeeding()))
            .unwrap();
    assert!(mesh.state().health().healthy);
    mesh.shutdown().await;
}

#[tokio::test]
async fn start_without_transfer_section_is_an_error() {
    let err = MeshRuntime::start(MeshConfig::default()).unwrap_err();
    assert!(matches!(err, RuntimeError::NoTransferApi));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_config_refuses_to_start() {
    let mut config = MeshConfig::default();
    config.bus.partitions = 0;
    let err = MeshRuntime::start_with_transfer(config, Arc::new(StubTransferApi::succeeding()))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Config(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn journal_path_persists_state_across_runtimes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MeshConfig::default();
    config.state.journal_path = Some(dir.path().join("nodes.journal"));

    let mesh = MeshRuntime::start_with_transfer(
        config.clone(),
        Arc::new(StubTransferApi::succeeding()),
    )
    .unwrap();
    mesh.state()
        .ingest_batch(&[arcnet_core::NodeTelemetry {
            node_id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            geohash: arcnet_core::Geohash::parse("9q8yyk").unwrap(),
            energy_source: arcnet_core::EnergySource::Solar,
            battery_level: 0.9,
            gpu_utilization: 0.1,
            gpu_memory_free_gb: 40.0,
            models_loaded: vec!["llama-3.1-8b".into()],
            schema_version: 2,
        }])
        .unwrap();
    mesh.shutdown().await;

    let reopened =
        MeshRuntime::start_with_transfer(config, Arc::new(StubTransferApi::succeeding())).unwrap();
    assert_eq!(reopened.state().health().nodes, 1);
    reopened.shutdown().await;
}
