// SPDX-License-Identifier: MIT OR Apache-2.0
//! Header map and well-known header keys.
//!
//! Every message minimally carries `entity-type` and `schema-version`.
//! Trace context (`trace-id`, `span-id`, `trace-flags`) propagates from
//! parent headers; a fresh trace is minted when there is none.

use arcnet_core::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Well-known header keys.
pub mod keys {
    /// Kind tag of the payload.
    pub const ENTITY_TYPE: &str = "entity-type";
    /// Schema version of the payload.
    pub const SCHEMA_VERSION: &str = "schema-version";
    /// 32-hex-character trace identifier.
    pub const TRACE_ID: &str = "trace-id";
    /// 16-hex-character span identifier.
    pub const SPAN_ID: &str = "span-id";
    /// W3C-style trace flags.
    pub const TRACE_FLAGS: &str = "trace-flags";
    /// Remaining scheduler retry budget.
    pub const RETRY_BUDGET: &str = "retry-budget";
    /// Bridge classification target.
    pub const CLASSIFICATION_TARGET: &str = "classification-target";
    /// Bridge classification reason.
    pub const CLASSIFICATION_REASON: &str = "classification-reason";
    /// Dead-letter: topic the payload arrived on.
    pub const ORIGINAL_TOPIC: &str = "original-topic";
    /// Dead-letter: partition the payload arrived on.
    pub const ORIGINAL_PARTITION: &str = "original-partition";
    /// Dead-letter: offset the payload arrived at.
    pub const ORIGINAL_OFFSET: &str = "original-offset";
    /// Dead-letter: why the payload was rejected.
    pub const ERROR: &str = "error";
}

/// An ordered string-to-string header map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// An empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers continuing the trace carried by `parent`, or starting a
    /// fresh trace when `parent` is `None` or untraced.
    ///
    /// The span id is always freshly minted.
    #[must_use]
    pub fn child_of(parent: Option<&Headers>) -> Self {
        let mut h = Self::new();
        let trace_id = parent
            .and_then(|p| p.get(keys::TRACE_ID))
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let flags = parent
            .and_then(|p| p.get(keys::TRACE_FLAGS))
            .map(str::to_string)
            .unwrap_or_else(|| "01".to_string());
        h.insert(keys::TRACE_ID, trace_id);
        h.insert(keys::SPAN_ID, new_span_id());
        h.insert(keys::TRACE_FLAGS, flags);
        h
    }

    /// Stamp the entity identity headers.
    pub fn stamp_entity(&mut self, kind: EntityKind, schema_version: u32) {
        self.insert(keys::ENTITY_TYPE, kind.as_str());
        self.insert(keys::SCHEMA_VERSION, schema_version.to_string());
    }

    /// Look up a header value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert a header, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Iterate over all headers in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Mint a 16-hex-character span identifier.
fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}
