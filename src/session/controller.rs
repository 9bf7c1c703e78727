use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use anyhow::anyhow;
use log::{debug, error, info, warn};
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    time::Duration,
};

use super::{
    break_timer::{ceil_secs, BreakEvent, BreakTimer},
    Mode, SessionSnapshot, SessionState,
};
use crate::{
    config::SessionSettings,
    error::{Result, SessionError},
    services::{
        AnalysisService, CaptureService, HostsBlocker, NotificationService, PersistenceService,
        ProcessReaper,
    },
    workers::{CaptureMonitor, CaptureMonitorConfig, ManagedWorker, ProcessKiller},
};

/// Longest break `set_break` accepts.
pub const MAX_BREAK_MINUTES: f64 = 24.0 * 60.0;

/// Everything the controller drives, injected so tests can substitute stubs.
pub struct Collaborators {
    pub blocker: Arc<dyn HostsBlocker>,
    pub reaper: Arc<dyn ProcessReaper>,
    pub capture: Arc<dyn CaptureService>,
    pub analysis: Arc<dyn AnalysisService>,
    pub notifier: Arc<dyn NotificationService>,
    pub persistence: Arc<dyn PersistenceService>,
}

struct ActiveBreak {
    generation: u64,
    timer: BreakTimer,
}

/// Owned by whoever holds the transition lock.
#[derive(Default)]
struct Transitions {
    active_break: Option<ActiveBreak>,
}

struct ControllerInner {
    settings: SessionSettings,
    state: Arc<Mutex<SessionState>>,
    transitions: AsyncMutex<Transitions>,
    closed: AtomicBool,
    blocker: Arc<dyn HostsBlocker>,
    killer: ManagedWorker<ProcessKiller>,
    monitor: ManagedWorker<CaptureMonitor>,
}

/// Supervises one deep work session.
///
/// Transitions are serialized on an async lock and run in a fixed order:
/// resolve any break, stop the workers, apply the blocking side effect, start
/// the new mode's workers, and only then publish the new mode. A failed side
/// effect leaves the previous mode in place with its enforcement restored.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(
        task: impl Into<String>,
        settings: SessionSettings,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let task = task.into();
        if task.trim().is_empty() {
            return Err(SessionError::Config("task must not be empty".into()));
        }
        settings.validate()?;

        let state = Arc::new(Mutex::new(SessionState::new(task.clone())));

        let killer = ManagedWorker::new(ProcessKiller::new(
            collaborators.reaper,
            settings.kill_interval(),
        ));
        let monitor = ManagedWorker::new(CaptureMonitor::new(
            &task,
            collaborators.capture,
            collaborators.analysis,
            collaborators.notifier,
            collaborators.persistence,
            Arc::clone(&state),
            CaptureMonitorConfig {
                interval: settings.capture_interval(),
                batch_size: settings.captures_before_analysis,
                notify_productive: settings.notify_productive,
            },
        ));

        Ok(Self {
            inner: Arc::new(ControllerInner {
                settings,
                state,
                transitions: AsyncMutex::new(Transitions::default()),
                closed: AtomicBool::new(false),
                blocker: collaborators.blocker,
                killer,
                monitor,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn status(&self) -> SessionSnapshot {
        self.state().snapshot()
    }

    pub fn mode(&self) -> Mode {
        self.state().mode
    }

    pub fn task(&self) -> String {
        self.state().task.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    /// Blocks sites and starts the killer and capture monitor.
    pub async fn set_on(&self) -> Result<()> {
        let mut transitions = self.inner.transitions.lock().await;
        self.ensure_open()?;
        if self.mode() == Mode::On {
            debug!("set_on ignored, already on");
            return Ok(());
        }
        self.transition(&mut transitions, Mode::On, None).await
    }

    /// Unblocks sites and stops all enforcement.
    pub async fn set_off(&self) -> Result<()> {
        let mut transitions = self.inner.transitions.lock().await;
        self.ensure_open()?;
        if self.mode() == Mode::Off {
            debug!("set_off ignored, already off");
            return Ok(());
        }
        self.transition(&mut transitions, Mode::Off, None).await
    }

    /// Pauses enforcement for `minutes`, then returns to On. Replaces any
    /// break already running.
    pub async fn set_break(&self, minutes: f64) -> Result<()> {
        if !minutes.is_finite() || minutes <= 0.0 || minutes > MAX_BREAK_MINUTES {
            return Err(SessionError::InvalidBreak(minutes));
        }
        let duration = Duration::try_from_secs_f64(minutes * 60.0)
            .map_err(|_| SessionError::InvalidBreak(minutes))?;

        let mut transitions = self.inner.transitions.lock().await;
        self.ensure_open()?;
        self.transition(&mut transitions, Mode::Break, Some(duration))
            .await
    }

    /// Stops everything, unblocks regardless of mode and closes the session.
    /// Later calls do nothing.
    pub async fn cleanup(&self) {
        let mut transitions = self.inner.transitions.lock().await;
        if self.is_closed() {
            return;
        }

        info!("Cleaning up session");
        self.cancel_break(&mut transitions).await;
        self.stop_workers().await;

        if let Err(err) = self.apply_blocking(false).await {
            error!("Failed to unblock during cleanup: {err:#}");
        }

        self.state().reset();
        self.inner.closed.store(true, Ordering::Release);
        info!("Session closed");
    }

    async fn transition(
        &self,
        transitions: &mut Transitions,
        target: Mode,
        break_for: Option<Duration>,
    ) -> Result<()> {
        let previous = self.mode();
        info!("Switching session {previous} -> {target}");

        let break_left = self.cancel_break(transitions).await;
        self.stop_workers().await;

        if let Err(err) = self.apply_blocking(target == Mode::On).await {
            error!("Failed to switch to {target}, staying {previous}: {err:#}");
            self.restore_enforcement(transitions, previous, break_left);
            return Err(SessionError::Blocking(err));
        }

        match target {
            Mode::On => self.start_workers(),
            Mode::Off => {}
            Mode::Break => {
                let duration = break_for.unwrap_or_default();
                if let Err(err) = self.start_break(transitions, duration) {
                    // Already unblocked with nothing running
                    error!("Failed to start break: {err:#}");
                    self.state().set_mode(Mode::Off);
                    return Err(SessionError::InvalidBreak(duration.as_secs_f64() / 60.0));
                }
            }
        }

        self.state().set_mode(target);
        info!("Session is {target}");
        Ok(())
    }

    /// Puts back whatever `previous` was enforcing after a failed switch.
    fn restore_enforcement(
        &self,
        transitions: &mut Transitions,
        previous: Mode,
        break_left: Option<Duration>,
    ) {
        match previous {
            Mode::On => self.start_workers(),
            Mode::Off => {}
            Mode::Break => {
                // A break that already ran out retries on the next tick
                let remaining = break_left
                    .filter(|left| !left.is_zero())
                    .unwrap_or_else(|| self.inner.settings.break_tick());
                if let Err(err) = self.start_break(transitions, remaining) {
                    error!("Failed to resume break: {err:#}");
                    self.state().set_mode(Mode::Off);
                }
            }
        }
    }

    fn start_workers(&self) {
        self.inner.killer.start();
        self.inner.monitor.start();
    }

    async fn stop_workers(&self) {
        let timeout = self.inner.settings.stop_timeout();
        tokio::join!(
            self.inner.killer.stop(timeout),
            self.inner.monitor.stop(timeout)
        );
    }

    async fn apply_blocking(&self, block: bool) -> anyhow::Result<()> {
        let blocker = Arc::clone(&self.inner.blocker);
        tokio::task::spawn_blocking(move || blocker.apply(block))
            .await
            .map_err(|err| anyhow!("hosts blocker task failed: {err}"))?
    }

    fn start_break(
        &self,
        transitions: &mut Transitions,
        duration: Duration,
    ) -> anyhow::Result<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let timer = BreakTimer::start(duration, self.inner.settings.break_tick(), events_tx)?;

        let generation = {
            let mut state = self.state();
            let generation = state.next_break_generation();
            state.break_remaining_secs = Some(ceil_secs(duration));
            generation
        };
        info!("Break {generation} started for {}s", ceil_secs(timer.duration()));

        transitions.active_break = Some(ActiveBreak { generation, timer });
        self.spawn_break_relay(generation, events_rx);
        Ok(())
    }

    /// Cancels the current break, waits for its countdown to exit and returns
    /// how much of it was left.
    async fn cancel_break(&self, transitions: &mut Transitions) -> Option<Duration> {
        let mut active = transitions.active_break.take()?;
        self.state().next_break_generation();

        let remaining = active.timer.remaining();
        let outcome = active.timer.cancel();
        active.timer.wait().await;
        debug!("Break {} resolved as {outcome:?}", active.generation);

        Some(remaining)
    }

    fn spawn_break_relay(&self, generation: u64, mut events: mpsc::UnboundedReceiver<BreakEvent>) {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    BreakEvent::Tick(remaining_secs) => {
                        controller.state().apply_break_tick(generation, remaining_secs);
                    }
                    BreakEvent::Completed => controller.finish_break(generation).await,
                }
            }
        });
    }

    /// Returns to On when break `generation` ran out, unless it was
    /// superseded or the session closed in the meantime.
    async fn finish_break(&self, generation: u64) {
        let mut transitions = self.inner.transitions.lock().await;
        if self.is_closed() {
            return;
        }
        let current = transitions.active_break.as_ref().map(|active| active.generation);
        if current != Some(generation) {
            debug!("Ignoring completion of stale break {generation}");
            return;
        }

        info!("Break over, back to deep work");
        if let Err(err) = self.transition(&mut transitions, Mode::On, None).await {
            warn!("Could not resume after break: {err}");
        }
    }
}
