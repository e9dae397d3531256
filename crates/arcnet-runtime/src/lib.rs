// SPDX-License-Identifier: MIT OR Apache-2.0
//! arcnet-runtime
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Top-level wiring for the ArcNet control plane.
//!
//! [`MeshRuntime::start`] builds the bus, the schema registry, and the
//! regional state tier, then starts every worker under a supervisor:
//! telemetry ingestion, the reservation sweeper, the scheduler, both
//! bridge loops, and the aggregator. [`MeshRuntime::shutdown`] cancels
//! and joins them all in reverse start order.

/// Component handles and the supervisor.
pub mod component;
/// Typed TOML configuration.
pub mod config;

use arcnet_bridge::{
    HttpTransferApi, PendingHandler, SubmissionHandler, TransferApi, PENDING_GROUP,
    SUBMISSION_GROUP,
};
use arcnet_scheduler::{Scheduler, SCHEDULER_GROUP};
use arcnet_schema::SchemaRegistry;
use arcnet_state::ingest::INGEST_GROUP;
use arcnet_state::{RegionalState, StoreError};
use arcnet_transport::{topics, BusConfig, Consumer, LogBus, Producer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub use component::{ComponentHandle, Supervisor};
pub use config::{ConfigError, ConfigWarning, MeshConfig};

/// Errors from starting the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store journal could not be opened or replayed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No transfer service configured and no test double injected.
    #[error("bridge needs a [transfer] section or an injected transfer API")]
    NoTransferApi,
}

/// Install the process-wide tracing subscriber (env-filtered, compact).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .try_init();
}

/// The started control plane.
pub struct MeshRuntime {
    bus: Arc<LogBus>,
    registry: Arc<SchemaRegistry>,
    state: Arc<RegionalState>,
    producer: Producer,
    supervisor: Supervisor,
}

impl std::fmt::Debug for MeshRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshRuntime").finish_non_exhaustive()
    }
}

impl MeshRuntime {
    /// Start the control plane from configuration.
    ///
    /// The bridge talks to the HTTP transfer service named in the
    /// `[transfer]` section; to run against a double (tests, local
    /// development), use [`start_with_transfer`](Self::start_with_transfer).
    pub fn start(config: MeshConfig) -> Result<Self, RuntimeError> {
        let transfer = config.transfer.as_ref().ok_or(RuntimeError::NoTransferApi)?;
        let api: Arc<dyn TransferApi> = Arc::new(HttpTransferApi::new(
            transfer.base_url.clone(),
            transfer.credentials.clone(),
        ));
        Self::start_with_transfer(config, api)
    }

    /// Start the control plane with an explicit transfer API.
    pub fn start_with_transfer(
        config: MeshConfig,
        transfer_api: Arc<dyn TransferApi>,
    ) -> Result<Self, RuntimeError> {
        let warnings = config.validate()?;
        for warning in &warnings {
            tracing::warn!(%warning, "configuration warning");
        }

        let bus = Arc::new(LogBus::with_config(BusConfig {
            partitions: config.bus.partitions,
        }));
        let registry = Arc::new(SchemaRegistry::with_builtin());
        let producer = Producer::new(Arc::clone(&bus), Arc::clone(&registry));

        let state = Arc::new(match &config.state.journal_path {
            Some(path) => RegionalState::open(path)?,
            None => RegionalState::in_memory(),
        });

        let mut supervisor = Supervisor::new();

        // Ingestion: telemetry topic into the store.
        let ingest_consumer = Consumer::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            topics::TELEMETRY_NODES,
            INGEST_GROUP,
        );
        let ingest_state = Arc::clone(&state);
        supervisor.register(ComponentHandle::spawn("state-ingest", move |token| {
            arcnet_state::ingest::run_ingestion(ingest_consumer, ingest_state, token)
        }));

        // Reservation sweeper.
        let sweep_state = Arc::clone(&state);
        let sweep_interval = Duration::from_secs(config.state.sweep_interval_secs);
        supervisor.register(ComponentHandle::spawn("reservation-sweeper", move |token| {
            arcnet_state::reservation::run_sweeper(sweep_state, sweep_interval, token)
        }));

        // Scheduler.
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&state),
            producer.clone(),
            config.scheduler.clone(),
        ));
        let scheduler_consumer = Consumer::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            topics::REQUEST_INFERENCE,
            SCHEDULER_GROUP,
        );
        supervisor.register(ComponentHandle::spawn("scheduler", move |token| {
            arcnet_scheduler::run_scheduler(scheduler_consumer, scheduler, token)
        }));

        // Bridge: submission loop.
        let submission = Arc::new(SubmissionHandler::new(
            producer.clone(),
            Arc::clone(&transfer_api),
            config.bridge.clone(),
        ));
        let submission_consumer = Consumer::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            topics::JOB_SUBMISSION,
            SUBMISSION_GROUP,
        );
        supervisor.register(ComponentHandle::spawn("bridge-submit", move |token| {
            arcnet_bridge::run_submission_loop(submission_consumer, submission, token)
        }));

        // Bridge: pending loop.
        let pending = Arc::new(PendingHandler::new(
            producer.clone(),
            Arc::clone(&transfer_api),
            config.bridge.clone(),
        ));
        let pending_consumer = Consumer::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            topics::BRIDGE_PENDING,
            PENDING_GROUP,
        );
        supervisor.register(ComponentHandle::spawn("bridge-pending", move |token| {
            arcnet_bridge::run_pending_loop(pending_consumer, pending, token)
        }));

        // Aggregator.
        let agg_state = Arc::clone(&state);
        let agg_producer = producer.clone();
        let agg_interval = Duration::from_secs(config.aggregator.interval_secs);
        supervisor.register(ComponentHandle::spawn("aggregator", move |token| {
            arcnet_aggregator::run_aggregator(agg_state, agg_producer, agg_interval, token)
        }));

        info!(
            components = ?supervisor.component_names(),
            "mesh runtime started"
        );
        Ok(Self {
            bus,
            registry,
            state,
            producer,
            supervisor,
        })
    }

    /// The bus every component shares.
    #[must_use]
    pub fn bus(&self) -> &Arc<LogBus> {
        &self.bus
    }

    /// The schema registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// The regional state tier.
    #[must_use]
    pub fn state(&self) -> &Arc<RegionalState> {
        &self.state
    }

    /// A producer over the shared bus.
    #[must_use]
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Stop every component and close the bus.
    pub async fn shutdown(self) {
        self.supervisor.shutdown().await;
        self.bus.close();
        info!("mesh runtime stopped");
    }
}
