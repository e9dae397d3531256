// SPDX-License-Identifier: MIT OR Apache-2.0
//! The embedded bitemporal document store.
//!
//! Every write appends a revision carrying both a valid time (when the
//! fact held in the world) and a system time (when it was written),
//! under a store-wide monotonic revision token. Nothing is ever deleted;
//! time travel reads the revision chain.
//!
//! Writes go through [`BitemporalStore::transact`] (atomic batches) or
//! [`BitemporalStore::compare_and_swap`] (the conditional update the
//! reservation primitive is built on). When a journal directory is
//! configured, committed revisions append to a JSONL journal that is
//! replayed on open.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Journal I/O failed; the transaction was not applied.
    #[error("journal I/O failed: {0}")]
    Journal(#[from] std::io::Error),

    /// A journal line could not be parsed during replay.
    #[error("corrupt journal line {line}: {source}")]
    CorruptJournal {
        /// 1-indexed line number.
        line: usize,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A document could not be serialized for the journal.
    #[error("journal encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of a [`compare_and_swap`](BitemporalStore::compare_and_swap).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The precondition held and the revision was written.
    Written {
        /// Revision token of the new entry.
        revision: u64,
    },
    /// Someone else wrote since the expected revision was observed.
    Conflict {
        /// The revision actually current.
        current: u64,
    },
    /// The key has never been written.
    NotFound,
}

/// A document together with its bitemporal coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<D> {
    /// The document at this revision.
    pub doc: D,
    /// Store-wide monotonic revision token.
    pub revision: u64,
    /// When the fact held in the world.
    pub valid_time: DateTime<Utc>,
    /// When the revision was written.
    pub system_time: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalLine<D> {
    key: String,
    revision: u64,
    valid_time: DateTime<Utc>,
    system_time: DateTime<Utc>,
    doc: D,
}

struct StoreInner<D> {
    // Per-key revision chains, oldest first.
    docs: BTreeMap<String, Vec<Versioned<D>>>,
    next_revision: u64,
    journal: Option<File>,
}

/// The embedded bitemporal key/value store.
pub struct BitemporalStore<D> {
    inner: Mutex<StoreInner<D>>,
    journal_path: Option<PathBuf>,
}

impl<D> BitemporalStore<D>
where
    D: Clone + Serialize + DeserializeOwned,
{
    /// An in-memory store with no journal.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                docs: BTreeMap::new(),
                next_revision: 1,
                journal: None,
            }),
            journal_path: None,
        }
    }

    /// Open a store backed by a JSONL journal, replaying any existing
    /// revisions.
    pub fn open(journal_path: &Path) -> Result<Self, StoreError> {
        let mut docs: BTreeMap<String, Vec<Versioned<D>>> = BTreeMap::new();
        let mut next_revision = 1u64;

        if journal_path.exists() {
            let reader = BufReader::new(File::open(journal_path)?);
            for (i, line) in reader.lines().enumerate() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let parsed: JournalLine<D> = serde_json::from_str(&line)
                    .map_err(|source| StoreError::CorruptJournal { line: i + 1, source })?;
                next_revision = next_revision.max(parsed.revision + 1);
                docs.entry(parsed.key).or_default().push(Versioned {
                    doc: parsed.doc,
                    revision: parsed.revision,
                    valid_time: parsed.valid_time,
                    system_time: parsed.system_time,
                });
            }
            info!(
                path = %journal_path.display(),
                keys = docs.len(),
                "journal replayed"
            );
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(journal_path)?;

        Ok(Self {
            inner: Mutex::new(StoreInner {
                docs,
                next_revision,
                journal: Some(journal),
            }),
            journal_path: Some(journal_path.to_path_buf()),
        })
    }

    /// The journal path, when persistence is configured.
    #[must_use]
    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    /// Run `f` inside one atomic transaction.
    ///
    /// Staged puts become visible all at once: either every put in the
    /// batch lands (journal first, then memory) or none does.
    pub fn transact<R>(
        &self,
        f: impl for<'t> FnOnce(&mut Txn<'t, D>) -> R,
    ) -> Result<R, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let mut txn = Txn {
            now: Utc::now(),
            next_revision: inner.next_revision,
            base: &inner.docs,
            staged: Vec::new(),
        };
        let out = f(&mut txn);
        let staged = txn.staged;
        let next_revision = txn.next_revision;

        if let Some(journal) = inner.journal.as_mut() {
            let mut buf = Vec::new();
            for (key, entry) in &staged {
                let line = JournalLine {
                    key: key.clone(),
                    revision: entry.revision,
                    valid_time: entry.valid_time,
                    system_time: entry.system_time,
                    doc: entry.doc.clone(),
                };
                serde_json::to_writer(&mut buf, &line)?;
                buf.push(b'\n');
            }
            journal.write_all(&buf)?;
            journal.flush()?;
        }

        for (key, entry) in staged {
            inner.docs.entry(key).or_default().push(entry);
        }
        inner.next_revision = next_revision;
        Ok(out)
    }

    /// Append one revision for `key`.
    pub fn put(
        &self,
        key: &str,
        doc: D,
        valid_time: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.transact(|txn| txn.put(key, doc, valid_time))
    }

    /// Write `doc` iff the current revision of `key` is
    /// `expected_revision`.
    pub fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        doc: D,
        valid_time: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let current = match inner.docs.get(key).and_then(|chain| chain.last()) {
            Some(entry) => entry.revision,
            None => return Ok(CasOutcome::NotFound),
        };
        if current != expected_revision {
            debug!(key, expected_revision, current, "compare-and-swap conflict");
            return Ok(CasOutcome::Conflict { current });
        }

        let revision = inner.next_revision;
        let entry = Versioned {
            doc,
            revision,
            valid_time,
            system_time: Utc::now(),
        };

        if let Some(journal) = inner.journal.as_mut() {
            let line = JournalLine {
                key: key.to_string(),
                revision: entry.revision,
                valid_time: entry.valid_time,
                system_time: entry.system_time,
                doc: entry.doc.clone(),
            };
            let mut buf = serde_json::to_vec(&line)?;
            buf.push(b'\n');
            journal.write_all(&buf)?;
            journal.flush()?;
        }

        inner.docs.entry(key.to_string()).or_default().push(entry);
        inner.next_revision = revision + 1;
        Ok(CasOutcome::Written { revision })
    }

    /// The latest revision of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Versioned<D>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.docs.get(key).and_then(|chain| chain.last()).cloned()
    }

    /// The latest revision of `key` written at or before `t`.
    #[must_use]
    pub fn as_of(&self, key: &str, t: DateTime<Utc>) -> Option<Versioned<D>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner
            .docs
            .get(key)?
            .iter()
            .rev()
            .find(|entry| entry.system_time <= t)
            .cloned()
    }

    /// Every revision of `key` written within `[from, to]`, oldest first.
    #[must_use]
    pub fn history(
        &self,
        key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Versioned<D>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner
            .docs
            .get(key)
            .map(|chain| {
                chain
                    .iter()
                    .filter(|e| e.system_time >= from && e.system_time <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The latest revision of every key, in key order.
    #[must_use]
    pub fn latest_snapshot(&self) -> Vec<(String, Versioned<D>)> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner
            .docs
            .iter()
            .filter_map(|(k, chain)| chain.last().map(|e| (k.clone(), e.clone())))
            .collect()
    }

    /// Number of keys ever written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("store lock poisoned").docs.len()
    }

    /// Whether the store has never been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A transaction view: staged puts layered over the committed state.
pub struct Txn<'a, D> {
    now: DateTime<Utc>,
    next_revision: u64,
    base: &'a BTreeMap<String, Vec<Versioned<D>>>,
    staged: Vec<(String, Versioned<D>)>,
}

impl<D: Clone> Txn<'_, D> {
    /// The latest revision of `key`, staged puts included.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Versioned<D>> {
        self.staged
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, entry)| entry)
            .or_else(|| self.base.get(key).and_then(|chain| chain.last()))
    }

    /// Stage one revision for `key`, returning its revision token.
    pub fn put(&mut self, key: &str, doc: D, valid_time: DateTime<Utc>) -> u64 {
        let revision = self.next_revision;
        self.next_revision += 1;
        self.staged.push((
            key.to_string(),
            Versioned {
                doc,
                revision,
                valid_time,
                system_time: self.now,
            },
        ));
        revision
    }
}
