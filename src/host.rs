use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::WorkerConfig;
use crate::error::{CommandError, ProtocolViolation};
use crate::source::LogSourceRef;
use crate::types::WorkerState;
use crate::worker::{Initialize, StreamWorker, WorkerHandle};

/// Opaque handle to a worker owned by a [`StreamHost`].
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

struct HostInner {
    source: LogSourceRef,
    config: WorkerConfig,
    next_id: AtomicU64,
    workers: Mutex<HashMap<WorkerId, WorkerHandle>>,
    shutdown: CancellationToken,
    reapers: TaskTracker,
}

impl Drop for HostInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Creates stream workers and routes commands to them by [`WorkerId`].
///
/// Bookkeeping for a worker is dropped as soon as the worker stops, whatever
/// the reason. Dropping the last clone of the host stops every worker.
#[derive(Clone)]
pub struct StreamHost {
    inner: Arc<HostInner>,
}

impl StreamHost {
    pub fn new(source: LogSourceRef, config: WorkerConfig) -> Self {
        Self {
            inner: Arc::new(HostInner {
                source,
                config,
                next_id: AtomicU64::new(1),
                workers: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                reapers: TaskTracker::new(),
            }),
        }
    }

    /// Creates an uninitialised worker.
    pub async fn spawn_worker(&self) -> WorkerId {
        let id = WorkerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (handle, join) = StreamWorker::spawn_with_shutdown(
            self.inner.source.clone(),
            self.inner.config.clone(),
            self.inner.shutdown.child_token(),
        );
        self.inner.workers.lock().await.insert(id, handle);
        debug!("[{}] Worker spawned", id);

        let registry: Weak<HostInner> = Arc::downgrade(&self.inner);
        self.inner.reapers.spawn(async move {
            match join.await {
                Ok(()) => debug!("[{}] Worker stopped", id),
                Err(e) if e.is_panic() => error!("[{}] Worker crashed: {}", id, e),
                Err(e) => debug!("[{}] Worker aborted: {}", id, e),
            }
            if let Some(inner) = registry.upgrade() {
                inner.workers.lock().await.remove(&id);
            }
        });
        id
    }

    /// Creates a worker and initialises it in one step.
    ///
    /// A rejected `Initialize` discards the new worker.
    pub async fn start(&self, init: Initialize) -> Result<WorkerId, CommandError> {
        let id = self.spawn_worker().await;
        match self.initialize(id, init).await {
            Ok(()) => Ok(id),
            Err(e) => {
                self.inner.workers.lock().await.remove(&id);
                Err(e)
            }
        }
    }

    pub async fn initialize(&self, id: WorkerId, init: Initialize) -> Result<(), CommandError> {
        let handle = self.handle(id).await?;
        let target = init.target.clone();
        handle.initialize(init).await?;
        info!("[{}] Streaming {}", id, target);
        Ok(())
    }

    pub async fn cancel(&self, id: WorkerId) -> Result<(), CommandError> {
        self.handle(id).await?.cancel().await
    }

    /// Current state of a worker, or `None` once its bookkeeping is gone.
    pub async fn state(&self, id: WorkerId) -> Option<WorkerState> {
        self.inner
            .workers
            .lock()
            .await
            .get(&id)
            .map(WorkerHandle::state)
    }

    /// Direct reference to the worker, bypassing the registry for later commands.
    pub async fn worker(&self, id: WorkerId) -> Option<WorkerHandle> {
        self.inner.workers.lock().await.get(&id).cloned()
    }

    /// Number of workers that have not stopped yet.
    pub async fn active(&self) -> usize {
        self.inner.workers.lock().await.len()
    }

    /// Stops every worker and waits until all of them have exited.
    pub async fn shutdown(&self) {
        let count = self.active().await;
        info!("Shutting down {} stream worker(s)", count);
        self.inner.shutdown.cancel();
        self.inner.reapers.close();
        self.inner.reapers.wait().await;
    }

    async fn handle(&self, id: WorkerId) -> Result<WorkerHandle, CommandError> {
        self.worker(id)
            .await
            .ok_or(CommandError::ProtocolViolation(ProtocolViolation::Terminated))
    }
}
