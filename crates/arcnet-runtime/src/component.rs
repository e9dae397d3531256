// SPDX-License-Identifier: MIT OR Apache-2.0
//! Component lifetimes.
//!
//! Every long-running worker is started through [`ComponentHandle::spawn`],
//! which pairs the task with its own cancellation token. The
//! [`Supervisor`] owns the handles and stops them in reverse start
//! order.

use arcnet_transport::CancellationToken;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A started component: its cancellation token plus its join handle.
pub struct ComponentHandle {
    name: String,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl ComponentHandle {
    /// Spawn a worker with a fresh cancellation token.
    ///
    /// `f` receives the token and must return the worker future; the
    /// worker is expected to exit promptly once the token cancels.
    pub fn spawn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let join = tokio::spawn(f(token.clone()));
        info!(component = name, "component started");
        Self { name, token, join }
    }

    /// The component's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the component to stop without waiting.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for the worker to exit.
    pub async fn stop(self) {
        self.token.cancel();
        match self.join.await {
            Ok(()) => info!(component = self.name, "component stopped"),
            Err(e) => warn!(component = self.name, error = %e, "component join failed"),
        }
    }
}

/// Owns every started component.
#[derive(Default)]
pub struct Supervisor {
    handles: Vec<ComponentHandle>,
}

impl Supervisor {
    /// An empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a started component.
    pub fn register(&mut self, handle: ComponentHandle) {
        self.handles.push(handle);
    }

    /// Names of every registered component, in start order.
    #[must_use]
    pub fn component_names(&self) -> Vec<&str> {
        self.handles.iter().map(ComponentHandle::name).collect()
    }

    /// Cancel everything, then await the workers in reverse start
    /// order.
    pub async fn shutdown(mut self) {
        // Signal first so components wind down concurrently.
        for handle in &self.handles {
            handle.cancel();
        }
        while let Some(handle) = self.handles.pop() {
            handle.stop().await;
        }
        info!("supervisor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn spawned_component_stops_on_cancel() {
        let stopped = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&stopped);
        let handle = ComponentHandle::spawn("probe", move |token| async move {
            token.cancelled().await;
            observed.store(true, Ordering::SeqCst);
        });
        handle.stop().await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn supervisor_stops_every_component() {
        let mut supervisor = Supervisor::new();
        let flags: Vec<Arc<AtomicBool>> = (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();
        for (i, flag) in flags.iter().enumerate() {
            let observed = Arc::clone(flag);
            supervisor.register(ComponentHandle::spawn(format!("w{i}"), move |token| {
                async move {
                    token.cancelled().await;
                    observed.store(true, Ordering::SeqCst);
                }
            }));
        }
        assert_eq!(supervisor.component_names(), vec!["w0", "w1", "w2"]);
        supervisor.shutdown().await;
        for flag in flags {
            assert!(flag.load(Ordering::SeqCst));
        }
    }
}
