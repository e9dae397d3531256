// SPDX-License-Identifier: MIT OR Apache-2.0
//! The reservation primitive: a short-lived exclusive claim on a node.
//!
//! There is no lock service anywhere in the mesh. Correctness comes from
//! the store's compare-and-set on the document revision plus idempotent
//! retry by callers. The scheduler treats a denied claim as "walk to the
//! next candidate", never as a failure.

use crate::store::CasOutcome;
use crate::RegionalState;
use arcnet_core::Reservation;
use arcnet_transport::CancellationToken;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default claim lifetime.
pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(30);

/// The complete taxonomy of denied reservation operations.
///
/// Contention outcomes (`already-reserved`, `race-condition`) are normal
/// results, not faults; callers route on them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationDenied {
    /// The node has never reported telemetry.
    #[error("node-not-found")]
    NodeNotFound,
    /// Another request holds an unexpired claim.
    #[error("already-reserved")]
    AlreadyReserved,
    /// A competitor wrote between our read and our compare-and-set.
    #[error("race-condition")]
    RaceCondition,
    /// The caller does not hold the claim it tried to touch.
    #[error("not-owner")]
    NotOwner,
    /// There is no claim on the node at all.
    #[error("no-reservation")]
    NoReservation,
    /// The claim had already lapsed.
    #[error("already-expired")]
    AlreadyExpired,
    /// The store itself failed.
    #[error("error: {0}")]
    Error(String),
}

impl RegionalState {
    /// Claim `node_id` for `request_id` with the given TTL.
    ///
    /// Re-reading after the write (and checking the claim is ours) is
    /// what turns a lost compare-and-set into an explicit
    /// [`ReservationDenied::RaceCondition`].
    pub fn reserve(
        &self,
        node_id: Uuid,
        request_id: Uuid,
        ttl: Duration,
    ) -> Result<Reservation, ReservationDenied> {
        let key = node_id.to_string();
        let now = Utc::now();

        let current = self
            .store()
            .get(&key)
            .ok_or(ReservationDenied::NodeNotFound)?;

        if let Some(held) = current.doc.active_reservation(now) {
            if held.request_id != request_id {
                debug!(%node_id, holder = %held.request_id, "node already reserved");
                return Err(ReservationDenied::AlreadyReserved);
            }
        }

        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| ReservationDenied::Error(e.to_string()))?;
        let reservation = Reservation {
            request_id,
            expires_at: now + ttl,
            created_at: now,
        };
        let mut doc = current.doc.clone();
        doc.reservation = Some(reservation.clone());

        let outcome = self
            .store()
            .compare_and_swap(&key, current.revision, doc, now)
            .map_err(|e| ReservationDenied::Error(e.to_string()))?;
        match outcome {
            CasOutcome::Written { .. } => {}
            CasOutcome::Conflict { .. } => return Err(ReservationDenied::RaceCondition),
            CasOutcome::NotFound => return Err(ReservationDenied::NodeNotFound),
        }

        // Verify the stored claim is ours; a competitor racing on a
        // different revision path must not be silently overwritten.
        let written = self
            .store()
            .get(&key)
            .ok_or(ReservationDenied::NodeNotFound)?;
        match written.doc.reservation {
            Some(ref held) if held.request_id == request_id => {
                debug!(%node_id, %request_id, expires_at = %reservation.expires_at, "node reserved");
                Ok(reservation)
            }
            _ => Err(ReservationDenied::RaceCondition),
        }
    }

    /// Release the claim held by `request_id` on `node_id`.
    pub fn release(&self, node_id: Uuid, request_id: Uuid) -> Result<(), ReservationDenied> {
        let key = node_id.to_string();
        let current = self
            .store()
            .get(&key)
            .ok_or(ReservationDenied::NodeNotFound)?;

        let held = current
            .doc
            .reservation
            .as_ref()
            .ok_or(ReservationDenied::NoReservation)?;
        if held.request_id != request_id {
            return Err(ReservationDenied::NotOwner);
        }

        let mut doc = current.doc.clone();
        doc.reservation = None;
        let outcome = self
            .store()
            .compare_and_swap(&key, current.revision, doc, Utc::now())
            .map_err(|e| ReservationDenied::Error(e.to_string()))?;
        match outcome {
            CasOutcome::Written { .. } => {
                debug!(%node_id, %request_id, "reservation released");
                Ok(())
            }
            CasOutcome::Conflict { .. } => Err(ReservationDenied::RaceCondition),
            CasOutcome::NotFound => Err(ReservationDenied::NodeNotFound),
        }
    }

    /// Extend an unexpired claim held by `request_id` by `extra`.
    pub fn extend(
        &self,
        node_id: Uuid,
        request_id: Uuid,
        extra: Duration,
    ) -> Result<Reservation, ReservationDenied> {
        let key = node_id.to_string();
        let now = Utc::now();
        let current = self
            .store()
            .get(&key)
            .ok_or(ReservationDenied::NodeNotFound)?;

        let held = current
            .doc
            .reservation
            .clone()
            .ok_or(ReservationDenied::NoReservation)?;
        if held.request_id != request_id {
            return Err(ReservationDenied::NotOwner);
        }
        if !held.is_active(now) {
            return Err(ReservationDenied::AlreadyExpired);
        }

        let extra = ChronoDuration::from_std(extra)
            .map_err(|e| ReservationDenied::Error(e.to_string()))?;
        let extended = Reservation {
            expires_at: held.expires_at + extra,
            ..held
        };
        let mut doc = current.doc.clone();
        doc.reservation = Some(extended.clone());

        let outcome = self
            .store()
            .compare_and_swap(&key, current.revision, doc, now)
            .map_err(|e| ReservationDenied::Error(e.to_string()))?;
        match outcome {
            CasOutcome::Written { .. } => {
                debug!(%node_id, %request_id, expires_at = %extended.expires_at, "reservation extended");
                Ok(extended)
            }
            CasOutcome::Conflict { .. } => Err(ReservationDenied::RaceCondition),
            CasOutcome::NotFound => Err(ReservationDenied::NodeNotFound),
        }
    }

    /// Clear every reservation that has lapsed. Returns how many were
    /// swept.
    ///
    /// Losing a compare-and-set here is fine: whoever won either took a
    /// fresh claim or cleared the slot already.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut swept = 0;
        for (key, entry) in self.store().latest_snapshot() {
            let Some(held) = entry.doc.reservation.as_ref() else {
                continue;
            };
            if held.is_active(now) {
                continue;
            }
            let mut doc = entry.doc.clone();
            doc.reservation = None;
            match self.store().compare_and_swap(&key, entry.revision, doc, now) {
                Ok(CasOutcome::Written { .. }) => swept += 1,
                Ok(_) => {}
                Err(e) => warn!(key, error = %e, "sweep write failed"),
            }
        }
        if swept > 0 {
            info!(swept, "expired reservations cleared");
        }
        swept
    }
}

/// Periodically clear lapsed reservations until cancelled.
///
/// A safety net for crashed holders; the liveness rules never depend on
/// it because activity checks compare against `expires_at` directly.
pub async fn run_sweeper(
    state: Arc<RegionalState>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(interval_secs = interval.as_secs(), "reservation sweeper started");
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                state.sweep_expired();
            }
        }
    }
    info!("reservation sweeper stopped");
}
