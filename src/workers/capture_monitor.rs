use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    task::AbortHandle,
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use super::managed::WorkerLoop;
use crate::{
    services::{
        productivity_prompt, AnalysisResult, AnalysisService, CaptureService,
        NotificationService, PersistenceService,
    },
    session::SessionState,
    utils::timestamp_key,
};

// Set to false to silence per-tick output from this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Images waiting for the next analysis, oldest first.
#[derive(Debug)]
pub struct CaptureBatch {
    images: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl CaptureBatch {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            images: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds an image, dropping the oldest one when already full.
    pub fn push(&mut self, image: Vec<u8>) {
        if self.images.len() == self.capacity {
            self.images.pop_front();
        }
        self.images.push_back(image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.images.len() >= self.capacity
    }

    pub fn to_vec(&self) -> Vec<Vec<u8>> {
        self.images.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }
}

/// Collaborators and knobs the monitor loop runs with.
pub struct CaptureMonitor {
    prompt: String,
    capture: Arc<dyn CaptureService>,
    analysis: Arc<dyn AnalysisService>,
    notifier: Arc<dyn NotificationService>,
    persistence: Arc<dyn PersistenceService>,
    state: Arc<Mutex<SessionState>>,
    interval: Duration,
    batch_size: usize,
    notify_productive: bool,
}

pub struct CaptureMonitorConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub notify_productive: bool,
}

impl CaptureMonitor {
    pub fn new(
        task: &str,
        capture: Arc<dyn CaptureService>,
        analysis: Arc<dyn AnalysisService>,
        notifier: Arc<dyn NotificationService>,
        persistence: Arc<dyn PersistenceService>,
        state: Arc<Mutex<SessionState>>,
        config: CaptureMonitorConfig,
    ) -> Self {
        Self {
            prompt: productivity_prompt(task),
            capture,
            analysis,
            notifier,
            persistence,
            state,
            interval: config.interval,
            batch_size: config.batch_size,
            notify_productive: config.notify_productive,
        }
    }

    async fn perform_tick(&self, batch: &mut CaptureBatch) {
        let capture_start = Instant::now();
        let capture = Arc::clone(&self.capture);
        let image = match tokio::task::spawn_blocking(move || capture.capture_stitched()).await {
            Ok(Ok(image)) => image,
            Ok(Err(err)) => {
                log_warn!("capture failed: {err:#}");
                return;
            }
            Err(err) => {
                log_error!("capture worker failed: {err}");
                return;
            }
        };

        log_info!(
            "capture {}/{}: {} bytes in {}ms",
            (batch.len() + 1).min(batch.capacity()),
            batch.capacity(),
            image.len(),
            capture_start.elapsed().as_millis()
        );

        self.persist_image(image.clone());
        batch.push(image);

        if batch.is_full() {
            self.analyze_batch(batch).await;
        }
    }

    async fn analyze_batch(&self, batch: &mut CaptureBatch) {
        let images = batch.to_vec();
        let analysis = Arc::clone(&self.analysis);
        let prompt = self.prompt.clone();

        let analysis_start = Instant::now();
        let handle = tokio::spawn(async move { analysis.analyze(&images, &prompt).await });
        let _abort = AbortOnDrop(handle.abort_handle());

        let verdict = match handle.await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => {
                log_warn!("analysis failed, keeping {} capture(s) for retry: {err:#}", batch.len());
                return;
            }
            Err(err) => {
                log_error!("analysis task failed, keeping captures for retry: {err}");
                return;
            }
        };

        let result = AnalysisResult::from_verdict(verdict, Utc::now());
        log_info!(
            "analysis in {}ms: productive={} reason={}",
            analysis_start.elapsed().as_millis(),
            result.is_productive,
            result.reason
        );

        {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.record_analysis(&result);
        }

        if !result.is_productive || self.notify_productive {
            self.notify(result.is_productive, result.reason.clone());
        }
        self.persist_analysis(result);
        batch.clear();
    }

    fn notify(&self, is_productive: bool, reason: String) {
        let notifier = Arc::clone(&self.notifier);
        tokio::task::spawn_blocking(move || notifier.announce(is_productive, &reason));
    }

    fn persist_image(&self, image: Vec<u8>) {
        let persistence = Arc::clone(&self.persistence);
        tokio::spawn(async move {
            let key = timestamp_key();
            if let Err(err) = persistence.save_image(&image, &key).await {
                log_warn!("failed to save capture {key}: {err:#}");
            }
        });
    }

    fn persist_analysis(&self, result: AnalysisResult) {
        let persistence = Arc::clone(&self.persistence);
        let prompt = self.prompt.clone();
        tokio::spawn(async move {
            let key = timestamp_key();
            if let Err(err) = persistence.save_analysis(&prompt, &result, &key).await {
                log_warn!("failed to save analysis {key}: {err:#}");
            }
        });
    }
}

/// Aborts an in-flight analysis when the tick is dropped by cancellation.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl WorkerLoop for CaptureMonitor {
    fn name(&self) -> &'static str {
        "capture monitor"
    }

    async fn run(self: Arc<Self>, cancel_token: CancellationToken) {
        let mut batch = CaptureBatch::new(self.batch_size);
        log_debug!("capture monitor running with batch size {}", batch.capacity());

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = self.perform_tick(&mut batch) => {}
            }

            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = time::sleep(self.interval) => {}
            }
        }

        log_info!(
            "capture monitor shutting down, discarding {} pending capture(s)",
            batch.len()
        );
    }
}
