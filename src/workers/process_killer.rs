use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;

use super::managed::WorkerLoop;
use crate::services::ProcessReaper;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// Kills distracting applications on a fixed cadence while the session is On.
pub struct ProcessKiller {
    reaper: Arc<dyn ProcessReaper>,
    interval: Duration,
}

impl ProcessKiller {
    pub fn new(reaper: Arc<dyn ProcessReaper>, interval: Duration) -> Self {
        Self { reaper, interval }
    }
}

#[async_trait]
impl WorkerLoop for ProcessKiller {
    fn name(&self) -> &'static str {
        "process killer"
    }

    async fn run(self: Arc<Self>, cancel_token: CancellationToken) {
        loop {
            let reaper = Arc::clone(&self.reaper);
            match tokio::task::spawn_blocking(move || reaper.kill_targets()).await {
                Ok(true) => log_debug!("process killer terminated at least one target"),
                Ok(false) => {}
                Err(err) => log_error!("process killer pass failed: {err}"),
            }

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    log_info!("process killer shutting down");
                    break;
                }
                _ = time::sleep(self.interval) => {}
            }
        }
    }
}
