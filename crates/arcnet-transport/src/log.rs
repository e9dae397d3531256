// SPDX-License-Identifier: MIT OR Apache-2.0
//! The embedded partitioned append-only log.
//!
//! Topics are created on first use with a fixed partition count. Records
//! land in one partition chosen by identity-hashing the key, so per-key
//! order is per-partition order. Consumer groups keep a durable cursor
//! per `(group, topic, partition)`; a poll reads from the committed
//! cursor, which makes uncommitted batches redeliver.
//!
//! A broker-backed bus would sit behind the same append/poll/commit
//! surface; everything above this module is agnostic to which one it is
//! talking to.

use crate::headers::Headers;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

/// Default partitions per topic.
const DEFAULT_PARTITIONS: u32 = 4;

/// Bus-level configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Partitions given to each auto-created topic.
    pub partitions: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
        }
    }
}

/// Errors surfaced by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The bus has been shut down; no appends or polls will succeed.
    #[error("bus is closed")]
    Closed,
}

/// Where a record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Topic the record was appended to.
    pub topic: String,
    /// Partition chosen by the key hash.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
}

/// A record as seen by a consumer.
#[derive(Debug, Clone)]
pub struct Record {
    /// Topic the record arrived on.
    pub topic: String,
    /// Partition it arrived on.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Partition key.
    pub key: String,
    /// Raw payload bytes (a frame, for typed traffic).
    pub payload: Vec<u8>,
    /// Headers stamped by the producer.
    pub headers: Headers,
    /// Broker-side append time.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    headers: Headers,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
}

#[derive(Debug, Default)]
struct BusInner {
    topics: BTreeMap<String, TopicLog>,
    // (group, topic, partition) -> next offset to read.
    cursors: BTreeMap<(String, String, u32), u64>,
    closed: bool,
}

/// The embedded log bus.
///
/// Cheap to share: wrap in an `Arc` and clone the handle everywhere.
#[derive(Debug, Default)]
pub struct LogBus {
    config: BusConfig,
    inner: Mutex<BusInner>,
    data_ready: Notify,
}

impl LogBus {
    /// Create a bus with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a bus with explicit configuration.
    #[must_use]
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BusInner::default()),
            data_ready: Notify::new(),
        }
    }

    /// Identity-hash a key onto a partition.
    fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.config.partitions)) as u32
    }

    /// Append a record, creating the topic on first use.
    pub fn append(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<RecordMetadata, BusError> {
        let partition = self.partition_for(key);
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        if inner.closed {
            return Err(BusError::Closed);
        }
        let partitions = self.config.partitions as usize;
        let log = inner.topics.entry(topic.to_string()).or_insert_with(|| TopicLog {
            partitions: vec![Vec::new(); partitions],
        });
        let slot = &mut log.partitions[partition as usize];
        let offset = slot.len() as u64;
        slot.push(StoredRecord {
            key: key.to_string(),
            payload,
            headers,
            timestamp: Utc::now(),
        });
        drop(inner);
        self.data_ready.notify_waiters();
        trace!(topic, partition, offset, "appended record");
        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    /// Read up to `max` records for `group` from its committed cursors.
    ///
    /// Does **not** advance the cursors; polling again without a commit
    /// returns the same records.
    fn fetch(&self, group: &str, topic: &str, max: usize) -> Result<Vec<Record>, BusError> {
        let inner = self.inner.lock().expect("bus lock poisoned");
        if inner.closed {
            return Err(BusError::Closed);
        }
        let mut out = Vec::new();
        let Some(log) = inner.topics.get(topic) else {
            return Ok(out);
        };
        for (partition, records) in log.partitions.iter().enumerate() {
            let cursor_key = (group.to_string(), topic.to_string(), partition as u32);
            let from = inner.cursors.get(&cursor_key).copied().unwrap_or(0) as usize;
            for (i, stored) in records.iter().enumerate().skip(from) {
                if out.len() >= max {
                    return Ok(out);
                }
                out.push(Record {
                    topic: topic.to_string(),
                    partition: partition as u32,
                    offset: i as u64,
                    key: stored.key.clone(),
                    payload: stored.payload.clone(),
                    headers: stored.headers.clone(),
                    timestamp: stored.timestamp,
                });
            }
        }
        Ok(out)
    }

    /// Block until records are available for `group` on `topic`, up to
    /// `timeout`. An empty vector means the timeout elapsed.
    pub async fn poll(
        &self,
        group: &str,
        topic: &str,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<Record>, BusError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Arm the notification before fetching so an append between
            // fetch and await is not missed.
            let notified = self.data_ready.notified();
            let batch = self.fetch(group, topic, max)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(deadline - now) => return Ok(Vec::new()),
            }
        }
    }

    /// Advance `group`'s cursor past the given `(partition, offset)`
    /// high-water marks.
    pub fn commit(&self, group: &str, topic: &str, marks: &[(u32, u64)]) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        for (partition, offset) in marks {
            let key = (group.to_string(), topic.to_string(), *partition);
            let next = offset + 1;
            let cursor = inner.cursors.entry(key).or_insert(0);
            if next > *cursor {
                *cursor = next;
            }
        }
    }

    /// Total records appended to a topic across all partitions.
    #[must_use]
    pub fn topic_len(&self, topic: &str) -> usize {
        let inner = self.inner.lock().expect("bus lock poisoned");
        inner
            .topics
            .get(topic)
            .map(|log| log.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Liveness probe. Errs when the bus is closed.
    pub fn ping(&self) -> Result<(), BusError> {
        let inner = self.inner.lock().expect("bus lock poisoned");
        if inner.closed {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }

    /// Shut the bus down. Subsequent appends and polls fail with
    /// [`BusError::Closed`]; blocked pollers wake immediately.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.closed = true;
        drop(inner);
        self.data_ready.notify_waiters();
    }
}
