// SPDX-License-Identifier: MIT OR Apache-2.0
//! Candidate scoring.
//!
//! The ranking is deterministic: descending score, ties broken by
//! ascending node id. The default weights keep the geozone contribution
//! strictly above the sum of every other term, so a node matching the
//! requester's zone always outranks one that does not.

use arcnet_core::{EnergySource, NodeDocument};
use serde::{Deserialize, Serialize};

/// Scoring weights, surfaced as configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Contribution for matching the requester's geozone prefix.
    pub geozone_match: f64,
    /// Contribution for solar power.
    pub energy_solar: f64,
    /// Contribution for cogeneration.
    pub energy_cogen: f64,
    /// Contribution for battery power.
    pub energy_battery: f64,
    /// Contribution for grid power.
    pub energy_grid: f64,
    /// Multiplier on GPU idleness (`1 - utilization`).
    pub gpu_idleness: f64,
    /// Multiplier on battery level.
    pub battery_level: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        // geozone_match > energy_solar + gpu_idleness + battery_level,
        // so locality dominates.
        Self {
            geozone_match: 100.0,
            energy_solar: 20.0,
            energy_cogen: 15.0,
            energy_battery: 10.0,
            energy_grid: 0.0,
            gpu_idleness: 15.0,
            battery_level: 10.0,
        }
    }
}

impl ScoringWeights {
    /// The weight for a node's energy source.
    #[must_use]
    pub fn energy(&self, source: EnergySource) -> f64 {
        match source {
            EnergySource::Solar => self.energy_solar,
            EnergySource::Cogen => self.energy_cogen,
            EnergySource::Battery => self.energy_battery,
            EnergySource::Grid => self.energy_grid,
        }
    }
}

/// Score one candidate against a requester geozone prefix.
#[must_use]
pub fn score(weights: &ScoringWeights, doc: &NodeDocument, requester_prefix: &str) -> f64 {
    let mut total = 0.0;
    if doc.geohash.has_prefix(requester_prefix) {
        total += weights.geozone_match;
    }
    total += weights.energy(doc.energy_source);
    total += weights.gpu_idleness * (1.0 - doc.gpu_utilization);
    total += weights.battery_level * doc.battery_level;
    total
}

/// Rank candidates: descending score, ties by ascending node id.
#[must_use]
pub fn rank(
    weights: &ScoringWeights,
    candidates: Vec<NodeDocument>,
    requester_prefix: &str,
) -> Vec<NodeDocument> {
    let mut scored: Vec<(f64, NodeDocument)> = candidates
        .into_iter()
        .map(|doc| (score(weights, &doc, requester_prefix), doc))
        .collect();
    scored.sort_by(|(sa, a), (sb, b)| {
        sb.total_cmp(sa).then_with(|| a.node_id.cmp(&b.node_id))
    });
    scored.into_iter().map(|(_, doc)| doc).collect()
}
