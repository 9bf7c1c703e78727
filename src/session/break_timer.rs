use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const COMPLETED: u8 = 2;

/// What the countdown reports to whoever owns the break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakEvent {
    /// Whole seconds left, rounded up.
    Tick(u64),
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakOutcome {
    Cancelled,
    Completed,
}

/// Single-use countdown. Exactly one of cancel or completion wins.
pub struct BreakTimer {
    duration: Duration,
    deadline: Instant,
    resolution: Arc<AtomicU8>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BreakTimer {
    /// Fails without spawning anything when `duration` reaches past what the
    /// clock can represent.
    pub fn start(
        duration: Duration,
        tick: Duration,
        events: mpsc::UnboundedSender<BreakEvent>,
    ) -> Result<Self> {
        let deadline = Instant::now()
            .checked_add(duration)
            .ok_or_else(|| anyhow!("break of {duration:?} overflows the clock"))?;
        let resolution = Arc::new(AtomicU8::new(PENDING));
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(countdown(
            deadline,
            tick,
            Arc::clone(&resolution),
            cancel_token.clone(),
            events,
        ));

        Ok(Self {
            duration,
            deadline,
            resolution,
            cancel_token,
            handle: Some(handle),
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn outcome(&self) -> Option<BreakOutcome> {
        match self.resolution.load(Ordering::Acquire) {
            CANCELLED => Some(BreakOutcome::Cancelled),
            COMPLETED => Some(BreakOutcome::Completed),
            _ => None,
        }
    }

    /// Resolves to Cancelled unless the countdown already completed, and
    /// reports whichever outcome won.
    pub fn cancel(&self) -> BreakOutcome {
        match self.resolution.compare_exchange(
            PENDING,
            CANCELLED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.cancel_token.cancel();
                BreakOutcome::Cancelled
            }
            Err(COMPLETED) => BreakOutcome::Completed,
            Err(_) => BreakOutcome::Cancelled,
        }
    }

    /// Waits for the countdown task to exit.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                log::error!("break countdown task failed: {err}");
            }
        }
    }
}

async fn countdown(
    deadline: Instant,
    tick: Duration,
    resolution: Arc<AtomicU8>,
    cancel_token: CancellationToken,
    events: mpsc::UnboundedSender<BreakEvent>,
) {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let _ = events.send(BreakEvent::Tick(ceil_secs(remaining)));

        tokio::select! {
            _ = cancel_token.cancelled() => return,
            _ = time::sleep(remaining.min(tick)) => {}
        }
    }

    if resolution
        .compare_exchange(PENDING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        let _ = events.send(BreakEvent::Tick(0));
        let _ = events.send(BreakEvent::Completed);
    }
}

pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    u64::try_from(millis.div_ceil(1000)).unwrap_or(u64::MAX)
}
