// SPDX-License-Identifier: MIT OR Apache-2.0
//! Consumer side: deliveries, batches, dead-letter routing, and the
//! handler loop every component worker runs on.

use crate::backoff::Backoff;
use crate::cancel::CancellationToken;
use crate::headers::{keys, Headers};
use crate::log::{BusError, LogBus, Record, RecordMetadata};
use crate::topics;
use arcnet_core::WireEntity;
use arcnet_schema::{Frame, SchemaRegistry};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default records pulled per poll cycle.
const DEFAULT_BATCH: usize = 64;

/// Default poll timeout.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of decoding one record.
#[derive(Debug)]
pub enum DeliveryStatus<T> {
    /// Decoded, migrated to the compiled version, and validated.
    Valid(T),
    /// Something failed; the raw payload went to the dead-letter topic.
    Invalid {
        /// Why the record was rejected.
        error: String,
    },
}

/// One record as surfaced to a handler.
#[derive(Debug)]
pub struct Delivery<T> {
    /// Validity and, when valid, the typed entity.
    pub status: DeliveryStatus<T>,
    /// Where the record came from.
    pub metadata: RecordMetadata,
    /// Headers as stamped by the producer.
    pub headers: Headers,
    /// Partition key.
    pub key: String,
}

impl<T> Delivery<T> {
    /// The typed entity, if the record was valid.
    #[must_use]
    pub fn entity(&self) -> Option<&T> {
        match &self.status {
            DeliveryStatus::Valid(t) => Some(t),
            DeliveryStatus::Invalid { .. } => None,
        }
    }
}

/// A polled batch plus the offsets that committing it advances.
#[derive(Debug)]
pub struct Batch<T> {
    /// Deliveries in partition order.
    pub deliveries: Vec<Delivery<T>>,
    marks: Vec<(u32, u64)>,
}

impl<T> Batch<T> {
    /// Whether the poll returned nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Iterate over the valid entities only.
    pub fn valid(&self) -> impl Iterator<Item = &T> {
        self.deliveries.iter().filter_map(Delivery::entity)
    }
}

/// Typed consumer with a durable group identity.
#[derive(Clone)]
pub struct Consumer {
    bus: Arc<LogBus>,
    registry: Arc<SchemaRegistry>,
    group: String,
    topic: String,
    batch_size: usize,
}

impl Consumer {
    /// Subscribe `group` to `topic`.
    #[must_use]
    pub fn new(
        bus: Arc<LogBus>,
        registry: Arc<SchemaRegistry>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            registry,
            group: group.into(),
            topic: topic.into(),
            batch_size: DEFAULT_BATCH,
        }
    }

    /// The topic this consumer reads.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Poll one batch, decoding every record to the compiled version of
    /// `T` and dead-lettering the records that fail.
    pub async fn poll<T: WireEntity>(&self, timeout: Duration) -> Result<Batch<T>, BusError> {
        let records = self
            .bus
            .poll(&self.group, &self.topic, self.batch_size, timeout)
            .await?;

        let mut high_water: BTreeMap<u32, u64> = BTreeMap::new();
        let mut deliveries = Vec::with_capacity(records.len());
        for record in records {
            let mark = high_water.entry(record.partition).or_insert(record.offset);
            if record.offset > *mark {
                *mark = record.offset;
            }
            deliveries.push(self.decode(record));
        }

        Ok(Batch {
            deliveries,
            marks: high_water.into_iter().collect(),
        })
    }

    /// Poll with the default timeout.
    pub async fn poll_default<T: WireEntity>(&self) -> Result<Batch<T>, BusError> {
        self.poll(DEFAULT_POLL_TIMEOUT).await
    }

    /// Poll raw records without decoding or dead-lettering.
    ///
    /// This is how dead-letter mirrors are read: their payloads are
    /// rejects by definition, and routing them through the typed path
    /// would mirror them again.
    pub async fn poll_raw(&self, timeout: Duration) -> Result<Vec<Record>, BusError> {
        self.bus
            .poll(&self.group, &self.topic, self.batch_size, timeout)
            .await
    }

    /// Commit a batch, advancing the group cursor past it.
    pub fn commit<T>(&self, batch: &Batch<T>) {
        self.bus.commit(&self.group, &self.topic, &batch.marks);
    }

    fn decode<T: WireEntity>(&self, record: Record) -> Delivery<T> {
        let metadata = RecordMetadata {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
        };
        let status = match self.decode_inner::<T>(&record) {
            Ok(entity) => DeliveryStatus::Valid(entity),
            Err(error) => {
                self.dead_letter(&record, &error);
                DeliveryStatus::Invalid { error }
            }
        };
        Delivery {
            status,
            metadata,
            headers: record.headers,
            key: record.key,
        }
    }

    fn decode_inner<T: WireEntity>(&self, record: &Record) -> Result<T, String> {
        let frame = Frame::decode(&record.payload).map_err(|e| e.to_string())?;
        if frame.kind != T::KIND {
            return Err(format!(
                "expected {} frame, got {}",
                T::KIND,
                frame.kind
            ));
        }
        let value = frame.payload_json().map_err(|e| e.to_string())?;
        self.registry
            .to_current::<T>(value, frame.schema_version)
            .map_err(|e| e.to_string())
    }

    /// Forward a rejected record to the topic's dead-letter mirror with
    /// the diagnostic headers.
    fn dead_letter(&self, record: &Record, error: &str) {
        let mut headers = record.headers.clone();
        headers.insert(keys::ORIGINAL_TOPIC, record.topic.clone());
        headers.insert(keys::ORIGINAL_PARTITION, record.partition.to_string());
        headers.insert(keys::ORIGINAL_OFFSET, record.offset.to_string());
        headers.insert(keys::ERROR, error);
        let dl_topic = topics::dead_letter(&record.topic);
        match self
            .bus
            .append(&dl_topic, &record.key, record.payload.clone(), headers)
        {
            Ok(_) => warn!(
                topic = record.topic,
                partition = record.partition,
                offset = record.offset,
                error,
                "record dead-lettered"
            ),
            Err(e) => warn!(
                topic = record.topic,
                error = %e,
                "failed to dead-letter record"
            ),
        }
    }
}

/// Run a consumer handler loop until the token is cancelled.
///
/// Each polled batch is handed to `handler`; offsets commit only when it
/// returns `Ok`, so a failing handler sees the batch again. A closed or
/// unreachable bus is retried with the 1 s → 30 s reconnect backoff, and
/// the idle path pings the bus as a heartbeat.
pub async fn run_handler_loop<T, F, Fut, E>(
    consumer: Consumer,
    token: CancellationToken,
    mut handler: F,
) where
    T: WireEntity,
    F: FnMut(Batch<T>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    let topic = consumer.topic().to_string();
    let mut backoff = Backoff::reconnect();
    info!(topic, "consumer loop started");
    loop {
        let batch = tokio::select! {
            () = token.cancelled() => break,
            polled = consumer.poll::<T>(DEFAULT_POLL_TIMEOUT) => polled,
        };
        match batch {
            Ok(batch) if batch.is_empty() => {
                // Idle: heartbeat the connection.
                if let Err(e) = consumer.bus.ping() {
                    warn!(topic, error = %e, "heartbeat failed");
                    let delay = backoff.next_delay();
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
            Ok(batch) => {
                backoff.reset();
                let marks = batch.marks.clone();
                match handler(batch).await {
                    Ok(()) => consumer.bus.commit(&consumer.group, &topic, &marks),
                    Err(e) => {
                        // Offsets stay put; the bus redelivers the batch.
                        warn!(topic, error = %e, "handler failed, batch will redeliver");
                    }
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(topic, error = %e, delay_ms = delay.as_millis() as u64, "poll failed, backing off");
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    info!(topic, "consumer loop stopped");
}
