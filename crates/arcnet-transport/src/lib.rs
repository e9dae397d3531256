// SPDX-License-Identifier: MIT OR Apache-2.0
//! arcnet-transport
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Typed publish/subscribe over a partitioned append-only log bus.
//!
//! Producers frame and validate before append; consumers surface each
//! record as valid (decoded, migrated, validated) or invalid (routed to
//! the topic's dead-letter mirror). Offsets commit only after a batch's
//! handler returns cleanly, so redelivery is at-least-once and handlers
//! must be idempotent.

/// Exponential reconnect backoff.
pub mod backoff;
/// Cancellation token threaded from component start to stop.
pub mod cancel;
/// Consumer side: deliveries, batches, dead-letter routing, handler loop.
pub mod consumer;
/// Header map and well-known header keys.
pub mod headers;
/// The embedded partitioned log.
pub mod log;
/// Producer side: framing, validation, append.
pub mod producer;
/// Contractual topic names.
pub mod topics;

use thiserror::Error;

pub use backoff::Backoff;
pub use cancel::CancellationToken;
pub use consumer::{Batch, Consumer, Delivery, DeliveryStatus, run_handler_loop};
pub use headers::Headers;
pub use log::{BusConfig, BusError, LogBus, Record, RecordMetadata};
pub use producer::Producer;

/// Errors surfaced by the typed transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame encoding or decoding failed.
    #[error(transparent)]
    Frame(#[from] arcnet_schema::FrameError),

    /// Outbound validation failed; the message was not appended.
    #[error(transparent)]
    Schema(#[from] arcnet_schema::SchemaError),

    /// The underlying bus rejected the operation.
    #[error(transparent)]
    Bus(#[from] BusError),
}
