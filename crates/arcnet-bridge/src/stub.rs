// SPDX-License-Identifier: MIT OR Apache-2.0
//! An in-memory transfer service double.
//!
//! Scriptable per-task status sequences let tests drive the pending loop
//! through any path of the transfer state machine without a network.

use crate::transfer::{
    TransferApi, TransferError, TransferInitiation, TransferPoll, TransferRequest,
};
use arcnet_core::TransferStatus;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct StubInner {
    // Status sequence per task; the last entry repeats once reached.
    scripts: BTreeMap<String, Vec<TransferStatus>>,
    polls: BTreeMap<String, u64>,
    canceled: Vec<String>,
    fail_initiations: u32,
}

/// Scriptable in-memory [`TransferApi`].
#[derive(Debug, Default)]
pub struct StubTransferApi {
    inner: Mutex<StubInner>,
    next_task: AtomicU64,
    default_script: Mutex<Vec<TransferStatus>>,
}

impl StubTransferApi {
    /// A stub whose transfers succeed on the first poll.
    #[must_use]
    pub fn succeeding() -> Self {
        let stub = Self::default();
        *stub.default_script.lock().expect("stub lock poisoned") =
            vec![TransferStatus::Succeeded];
        stub
    }

    /// A stub whose transfers follow the given status sequence; the last
    /// status repeats once the script runs out.
    #[must_use]
    pub fn scripted(script: Vec<TransferStatus>) -> Self {
        let stub = Self::default();
        *stub.default_script.lock().expect("stub lock poisoned") = script;
        stub
    }

    /// Make the next `n` initiations fail with an API error.
    pub fn fail_next_initiations(&self, n: u32) {
        self.inner.lock().expect("stub lock poisoned").fail_initiations = n;
    }

    /// Poll count for a task.
    #[must_use]
    pub fn polls(&self, task_id: &str) -> u64 {
        self.inner
            .lock()
            .expect("stub lock poisoned")
            .polls
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }

    /// Tasks that have been cancelled.
    #[must_use]
    pub fn canceled(&self) -> Vec<String> {
        self.inner.lock().expect("stub lock poisoned").canceled.clone()
    }
}

#[async_trait]
impl TransferApi for StubTransferApi {
    async fn initiate(
        &self,
        _request: &TransferRequest,
    ) -> Result<TransferInitiation, TransferError> {
        let mut inner = self.inner.lock().expect("stub lock poisoned");
        if inner.fail_initiations > 0 {
            inner.fail_initiations -= 1;
            return Err(TransferError::Api {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        let n = self.next_task.fetch_add(1, Ordering::SeqCst);
        let task_id = format!("task-{n}");
        let script = self.default_script.lock().expect("stub lock poisoned").clone();
        inner.scripts.insert(task_id.clone(), script);
        Ok(TransferInitiation {
            task_id: task_id.clone(),
            submission_id: format!("sub-{n}"),
        })
    }

    async fn poll(&self, task_id: &str) -> Result<TransferPoll, TransferError> {
        let mut inner = self.inner.lock().expect("stub lock poisoned");
        let count = inner.polls.entry(task_id.to_string()).or_insert(0);
        let index = *count as usize;
        *count += 1;
        let script = inner
            .scripts
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| vec![TransferStatus::Unknown]);
        let status = script
            .get(index)
            .or_else(|| script.last())
            .copied()
            .unwrap_or(TransferStatus::Unknown);
        Ok(TransferPoll {
            status,
            bytes_transferred: 1024 * 1024,
            files_transferred: 12,
            nice_status: Some(format!("{status:?}")),
        })
    }

    async fn cancel(&self, task_id: &str) -> Result<(), TransferError> {
        self.inner
            .lock()
            .expect("stub lock poisoned")
            .canceled
            .push(task_id.to_string());
        Ok(())
    }
}
