// SPDX-License-Identifier: MIT OR Apache-2.0
//! arcnet-state
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The regional state tier.
//!
//! Embeds the bitemporal document store, keeps the secondary indexes the
//! scheduler queries, runs the telemetry ingestion worker, and hosts the
//! reservation primitive. One instance serves one geozone cluster;
//! everything it owns is reached through [`RegionalState`].

/// Telemetry ingestion worker.
pub mod ingest;
/// The reservation primitive and its sweeper.
pub mod reservation;
/// The embedded bitemporal store.
pub mod store;

use arcnet_core::{EnergySource, NodeDocument, NodeTelemetry, RegionalSummary, WireEntity};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub use reservation::{ReservationDenied, DEFAULT_RESERVATION_TTL};
pub use store::{BitemporalStore, CasOutcome, StoreError, Versioned};

/// Query parameters for [`RegionalState::find_available`].
#[derive(Debug, Clone)]
pub struct AvailabilityQuery {
    /// Geohash prefix the node must fall under (a geozone id or a full
    /// geohash both work).
    pub geozone_prefix: String,
    /// Model that must be resident on the node.
    pub model_id: String,
    /// Minimum battery level.
    pub min_battery: f64,
    /// Skip the liveness filter. Off for every scheduling path.
    pub include_stale: bool,
}

/// Point-in-time health of the state tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateHealth {
    /// Whether the tier is serving queries.
    pub healthy: bool,
    /// Nodes ever seen.
    pub nodes: usize,
}

#[derive(Debug, Default)]
struct Indexes {
    by_zone: BTreeMap<String, BTreeSet<Uuid>>,
    by_model: BTreeMap<String, BTreeSet<Uuid>>,
}

impl Indexes {
    fn observe(&mut self, doc: &NodeDocument) {
        self.by_zone
            .entry(doc.geozone_id.as_str().to_string())
            .or_default()
            .insert(doc.node_id);
        for model in &doc.models_loaded {
            self.by_model
                .entry(model.clone())
                .or_default()
                .insert(doc.node_id);
        }
    }
}

/// The regional state tier: store plus indexes plus query surface.
///
/// Ingestion serialises against queries through the index lock, so a
/// telemetry batch is either fully visible to a query or not at all.
pub struct RegionalState {
    store: BitemporalStore<NodeDocument>,
    indexes: Mutex<Indexes>,
}

impl RegionalState {
    /// An in-memory tier with no journal.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: BitemporalStore::in_memory(),
            indexes: Mutex::new(Indexes::default()),
        }
    }

    /// A tier whose store journals to `path`, replaying existing history
    /// (and rebuilding indexes from it) on open.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let store = BitemporalStore::open(path)?;
        let mut indexes = Indexes::default();
        for (_, entry) in store.latest_snapshot() {
            indexes.observe(&entry.doc);
        }
        Ok(Self {
            store,
            indexes: Mutex::new(indexes),
        })
    }

    /// The underlying store. Reservation code goes through this; nothing
    /// else should.
    #[must_use]
    pub(crate) fn store(&self) -> &BitemporalStore<NodeDocument> {
        &self.store
    }

    /// Apply a poll cycle's telemetries in one transaction.
    ///
    /// Existing documents are refreshed in place (reservation slot
    /// preserved); new nodes get fresh documents. Returns the number of
    /// documents written.
    pub fn ingest_batch(&self, samples: &[NodeTelemetry]) -> Result<usize, StoreError> {
        self.ingest_batch_at(samples, Utc::now())
    }

    /// [`ingest_batch`](Self::ingest_batch) with an explicit ingestion
    /// time, which `last_seen` (and therefore liveness) is derived from.
    pub fn ingest_batch_at(
        &self,
        samples: &[NodeTelemetry],
        ingested_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut indexes = self.indexes.lock().expect("index lock poisoned");
        let docs = self.store.transact(|txn| {
            let mut docs = Vec::with_capacity(samples.len());
            for sample in samples {
                let key = sample.node_id.to_string();
                let doc = match txn.get(&key) {
                    Some(current) => current.doc.refreshed(sample, ingested_at),
                    None => NodeDocument::from_telemetry(sample, ingested_at),
                };
                // Valid time is when the sample was taken; system time is
                // assigned by the transaction.
                txn.put(&key, doc.clone(), sample.timestamp);
                docs.push(doc);
            }
            docs
        })?;
        for doc in &docs {
            indexes.observe(doc);
        }
        debug!(count = docs.len(), "telemetry batch ingested");
        Ok(docs.len())
    }

    /// Live, unreserved nodes under a geohash prefix with the model
    /// resident and battery at or above the floor, ordered by ascending
    /// GPU utilization (ties by node id).
    #[must_use]
    pub fn find_available(&self, query: &AvailabilityQuery) -> Vec<NodeDocument> {
        let now = Utc::now();
        let indexes = self.indexes.lock().expect("index lock poisoned");
        // The model index is add-only, so it narrows the candidate set;
        // the document itself is the authority on what is loaded now.
        let model_nodes = indexes.by_model.get(&query.model_id);
        let mut out: Vec<NodeDocument> = self
            .zone_candidates(&indexes, &query.geozone_prefix)
            .into_iter()
            .filter(|id| model_nodes.is_some_and(|ids| ids.contains(id)))
            .filter_map(|id| self.store.get(&id.to_string()))
            .map(|entry| entry.doc)
            .filter(|doc| doc.geohash.has_prefix(&query.geozone_prefix))
            .filter(|doc| query.include_stale || doc.is_live(now))
            .filter(|doc| doc.has_model(&query.model_id))
            .filter(|doc| doc.battery_level >= query.min_battery)
            .filter(|doc| doc.active_reservation(now).is_none())
            .collect();
        out.sort_by(|a, b| {
            a.gpu_utilization
                .total_cmp(&b.gpu_utilization)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        out
    }

    /// Latest documents for every node under a geohash prefix.
    #[must_use]
    pub fn nodes_by_geohash_prefix(&self, prefix: &str) -> Vec<NodeDocument> {
        let indexes = self.indexes.lock().expect("index lock poisoned");
        self.zone_candidates(&indexes, prefix)
            .into_iter()
            .filter_map(|id| self.store.get(&id.to_string()))
            .map(|entry| entry.doc)
            .filter(|doc| doc.geohash.has_prefix(prefix))
            .collect()
    }

    /// Live-node counts per energy source across the whole tier.
    #[must_use]
    pub fn counts_by_energy(&self) -> BTreeMap<EnergySource, u64> {
        let now = Utc::now();
        let _guard = self.indexes.lock().expect("index lock poisoned");
        let mut counts = BTreeMap::new();
        for (_, entry) in self.store.latest_snapshot() {
            if entry.doc.is_live(now) {
                *counts.entry(entry.doc.energy_source).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Point lookup by node id.
    #[must_use]
    pub fn get(&self, node_id: Uuid) -> Option<Versioned<NodeDocument>> {
        self.store.get(&node_id.to_string())
    }

    /// The node's state as of system time `t`.
    #[must_use]
    pub fn as_of(&self, node_id: Uuid, t: DateTime<Utc>) -> Option<Versioned<NodeDocument>> {
        self.store.as_of(&node_id.to_string(), t)
    }

    /// Every revision of the node written within `[from, to]`.
    #[must_use]
    pub fn history(
        &self,
        node_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Versioned<NodeDocument>> {
        self.store.history(&node_id.to_string(), from, to)
    }

    /// Per-geozone rollups over live nodes, in geozone order.
    #[must_use]
    pub fn summaries(&self) -> Vec<RegionalSummary> {
        let now = Utc::now();
        let _guard = self.indexes.lock().expect("index lock poisoned");

        #[derive(Default)]
        struct Acc {
            active: u64,
            available: u64,
            battery_sum: f64,
            util_sum: f64,
            energy: BTreeMap<String, u64>,
        }

        let mut zones: BTreeMap<String, Acc> = BTreeMap::new();
        for (_, entry) in self.store.latest_snapshot() {
            let doc = entry.doc;
            if !doc.is_live(now) {
                continue;
            }
            let acc = zones.entry(doc.geozone_id.as_str().to_string()).or_default();
            acc.active += 1;
            if doc.active_reservation(now).is_none() {
                acc.available += 1;
            }
            acc.battery_sum += doc.battery_level;
            acc.util_sum += doc.gpu_utilization;
            *acc.energy.entry(doc.energy_source.to_string()).or_insert(0) += 1;
        }

        zones
            .into_iter()
            .map(|(zone, acc)| {
                let n = acc.active as f64;
                RegionalSummary {
                    geozone_id: arcnet_core::GeozoneId::new(&zone),
                    active_nodes: acc.active,
                    available_gpus: acc.available,
                    avg_battery: if acc.active == 0 { 0.0 } else { acc.battery_sum / n },
                    avg_gpu_utilization: if acc.active == 0 { 0.0 } else { acc.util_sum / n },
                    energy_sources: acc.energy,
                    generated_at: now,
                    schema_version: RegionalSummary::CURRENT_VERSION,
                }
            })
            .collect()
    }

    /// Health of the tier, gating the aggregation ticker.
    #[must_use]
    pub fn health(&self) -> StateHealth {
        StateHealth {
            healthy: true,
            nodes: self.store.len(),
        }
    }

    /// Candidate node ids under a prefix via the geozone index.
    fn zone_candidates(&self, indexes: &Indexes, prefix: &str) -> Vec<Uuid> {
        let prefix = prefix.to_ascii_lowercase();
        if prefix.len() >= arcnet_core::GEOZONE_PREFIX_LEN {
            let zone = &prefix[..arcnet_core::GEOZONE_PREFIX_LEN];
            indexes
                .by_zone
                .get(zone)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default()
        } else {
            indexes
                .by_zone
                .range(prefix.clone()..)
                .take_while(|(zone, _)| zone.starts_with(&prefix))
                .flat_map(|(_, ids)| ids.iter().copied())
                .collect()
        }
    }
}

impl std::fmt::Debug for RegionalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionalState")
            .field("nodes", &self.store.len())
            .finish()
    }
}
