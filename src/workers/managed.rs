use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

/// A loop that runs until its token is cancelled.
#[async_trait]
pub trait WorkerLoop: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(self: Arc<Self>, cancel_token: CancellationToken);
}

#[derive(Default)]
struct WorkerSlot {
    running: bool,
    cancel_token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Start/stop wrapper that keeps at most one execution of a loop alive.
pub struct ManagedWorker<W: WorkerLoop> {
    worker: Arc<W>,
    slot: Mutex<WorkerSlot>,
}

impl<W: WorkerLoop> ManagedWorker<W> {
    pub fn new(worker: W) -> Self {
        Self {
            worker: Arc::new(worker),
            slot: Mutex::new(WorkerSlot::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.worker.name()
    }

    fn slot(&self) -> MutexGuard<'_, WorkerSlot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot().running
    }

    /// Spawns a fresh execution. Returns false if one is already running.
    pub fn start(&self) -> bool {
        let mut slot = self.slot();
        if slot.running {
            return false;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.worker).run(cancel_token.clone()));

        slot.running = true;
        slot.cancel_token = Some(cancel_token);
        slot.handle = Some(handle);
        info!("{} started", self.name());
        true
    }

    /// Cancels the loop and waits up to `timeout` for it to exit. A loop that
    /// overruns is left to finish on its own.
    pub async fn stop(&self, timeout: Duration) {
        let handle = {
            let mut slot = self.slot();
            if !slot.running {
                return;
            }
            if let Some(token) = slot.cancel_token.take() {
                token.cancel();
            }
            slot.handle.take()
        };

        if let Some(handle) = handle {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!("{} stopped", self.name()),
                Ok(Err(err)) => error!("{} task failed: {err}", self.name()),
                Err(_) => warn!(
                    "{} did not stop within {:?}; detaching it",
                    self.name(),
                    timeout
                ),
            }
        }

        self.slot().running = false;
    }
}

impl<W: WorkerLoop> Drop for ManagedWorker<W> {
    fn drop(&mut self) {
        if let Some(token) = self.slot().cancel_token.take() {
            token.cancel();
        }
    }
}
