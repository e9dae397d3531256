// SPDX-License-Identifier: MIT OR Apache-2.0
//! Producer side: framing, outbound validation, append.

use crate::headers::Headers;
use crate::log::{LogBus, RecordMetadata};
use crate::TransportError;
use arcnet_core::WireEntity;
use arcnet_schema::{Frame, SchemaRegistry};
use std::sync::Arc;
use tracing::debug;

/// Typed producer over the log bus.
///
/// Outbound payloads are validated before append and the send fails
/// fast on a schema violation; bad data never reaches the log from this
/// side.
#[derive(Clone)]
pub struct Producer {
    bus: Arc<LogBus>,
    registry: Arc<SchemaRegistry>,
}

impl Producer {
    /// Create a producer over a bus and schema registry.
    #[must_use]
    pub fn new(bus: Arc<LogBus>, registry: Arc<SchemaRegistry>) -> Self {
        Self { bus, registry }
    }

    /// Frame, validate, and append an entity.
    ///
    /// Headers continue the trace in `parent` (a fresh trace is minted
    /// when `None`) and always carry the entity identity pair. `extra`
    /// headers are merged on top.
    pub async fn send<T: WireEntity>(
        &self,
        topic: &str,
        key: &str,
        entity: &T,
        parent: Option<&Headers>,
        extra: Option<&Headers>,
    ) -> Result<RecordMetadata, TransportError> {
        let frame = Frame::from_entity(entity)?;
        self.registry
            .validate(T::KIND, T::CURRENT_VERSION, &frame.payload_json()?)?;

        let mut headers = Headers::child_of(parent);
        headers.stamp_entity(T::KIND, T::CURRENT_VERSION);
        if let Some(extra) = extra {
            for (k, v) in extra.iter() {
                headers.insert(k, v);
            }
        }

        let metadata = self.bus.append(topic, key, frame.encode(), headers)?;
        debug!(
            topic,
            key,
            partition = metadata.partition,
            offset = metadata.offset,
            entity = %T::KIND,
            "sent record"
        );
        Ok(metadata)
    }

    /// Append raw bytes without framing or validation.
    ///
    /// Used for dead-letter routing, where the whole point is that the
    /// payload did not parse.
    pub fn send_raw(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<RecordMetadata, TransportError> {
        Ok(self.bus.append(topic, key, payload, headers)?)
    }

    /// The bus this producer appends to.
    #[must_use]
    pub fn bus(&self) -> &Arc<LogBus> {
        &self.bus
    }

    /// The registry this producer validates against.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }
}
