use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use deepwork_lib::{
    config::SessionSettings,
    services::{
        AnalysisResult, AnalysisService, CaptureService, HostsBlocker, NotificationService,
        PersistenceService, ProcessReaper, Verdict,
    },
    session::{Collaborators, Mode, SessionController, MAX_BREAK_MINUTES},
    SessionError,
};

#[derive(Default)]
struct RecordingBlocker {
    calls: Mutex<Vec<bool>>,
    fail: AtomicBool,
}

impl RecordingBlocker {
    fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }
}

impl HostsBlocker for RecordingBlocker {
    fn apply(&self, block: bool) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("permission denied");
        }
        self.calls.lock().unwrap().push(block);
        Ok(())
    }
}

#[derive(Default)]
struct CountingReaper {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ProcessReaper for CountingReaper {
    fn kill_targets(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        false
    }
}

#[derive(Default)]
struct StubCapture {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    panic_on_odd_calls: AtomicBool,
}

impl CaptureService for StubCapture {
    fn capture_stitched(&self) -> Result<Vec<u8>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_odd_calls.load(Ordering::SeqCst) && n % 2 == 1 {
            panic!("camera unplugged");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(3));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![n as u8])
    }
}

struct ScriptedAnalysis {
    script: Mutex<VecDeque<Result<Verdict>>>,
    fallback: Verdict,
    batches: Mutex<Vec<Vec<Vec<u8>>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAnalysis {
    fn returning(fallback: Verdict) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            batches: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalysis {
    async fn analyze(&self, images: &[Vec<u8>], prompt: &str) -> Result<Verdict> {
        self.batches.lock().unwrap().push(images.to_vec());
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    announcements: Mutex<Vec<(bool, String)>>,
}

impl RecordingNotifier {
    fn announcements(&self) -> Vec<(bool, String)> {
        self.announcements.lock().unwrap().clone()
    }
}

impl NotificationService for RecordingNotifier {
    fn announce(&self, is_productive: bool, reason: &str) {
        self.announcements
            .lock()
            .unwrap()
            .push((is_productive, reason.to_string()));
    }
}

#[derive(Default)]
struct RecordingPersistence {
    images: AtomicUsize,
    analyses: Mutex<Vec<AnalysisResult>>,
}

#[async_trait]
impl PersistenceService for RecordingPersistence {
    async fn save_image(&self, _bytes: &[u8], _key: &str) -> Result<()> {
        self.images.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_analysis(&self, _prompt: &str, result: &AnalysisResult, _key: &str) -> Result<()> {
        self.analyses.lock().unwrap().push(result.clone());
        Err(anyhow!("disk full"))
    }
}

fn distracted() -> Verdict {
    Verdict {
        is_productive: false,
        reason: "Hey, I noticed a game.".into(),
        raw: r#"{"productive": "no", "reason": "Hey, I noticed a game."}"#.into(),
    }
}

fn focused() -> Verdict {
    Verdict {
        is_productive: true,
        reason: "Nice work on the tests!".into(),
        raw: r#"{"productive": "yes", "reason": "Nice work on the tests!"}"#.into(),
    }
}

fn fast_settings() -> SessionSettings {
    SessionSettings {
        capture_interval_ms: 20,
        captures_before_analysis: 3,
        kill_interval_ms: 5,
        stop_timeout_ms: 1_000,
        break_tick_ms: 1_000,
        notify_productive: false,
    }
}

struct Harness {
    blocker: Arc<RecordingBlocker>,
    reaper: Arc<CountingReaper>,
    capture: Arc<StubCapture>,
    analysis: Arc<ScriptedAnalysis>,
    notifier: Arc<RecordingNotifier>,
    persistence: Arc<RecordingPersistence>,
}

impl Harness {
    fn new(verdict: Verdict) -> Self {
        Self {
            blocker: Arc::new(RecordingBlocker::default()),
            reaper: Arc::new(CountingReaper::default()),
            capture: Arc::new(StubCapture::default()),
            analysis: Arc::new(ScriptedAnalysis::returning(verdict)),
            notifier: Arc::new(RecordingNotifier::default()),
            persistence: Arc::new(RecordingPersistence::default()),
        }
    }

    fn controller(&self, settings: SessionSettings) -> SessionController {
        SessionController::new(
            "write tests",
            settings,
            Collaborators {
                blocker: self.blocker.clone(),
                reaper: self.reaper.clone(),
                capture: self.capture.clone(),
                analysis: self.analysis.clone(),
                notifier: self.notifier.clone(),
                persistence: self.persistence.clone(),
            },
        )
        .unwrap()
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_on_and_off_touch_nothing() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());

    controller.set_off().await.unwrap();
    assert!(harness.blocker.calls().is_empty());

    controller.set_on().await.unwrap();
    controller.set_on().await.unwrap();
    assert_eq!(harness.blocker.calls(), vec![true]);
    assert_eq!(controller.status().mode, Mode::On);

    controller.set_off().await.unwrap();
    controller.set_off().await.unwrap();
    assert_eq!(harness.blocker.calls(), vec![true, false]);

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transitions_keep_one_instance_of_each_worker() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());

    let mut handles = Vec::new();
    for i in 0..24 {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move {
            match i % 3 {
                0 => controller.set_on().await,
                1 => controller.set_off().await,
                _ => controller.set_break(5.0).await,
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    controller.set_on().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    assert_eq!(controller.mode(), Mode::On);
    assert!(harness.reaper.calls.load(Ordering::SeqCst) > 0);
    assert!(harness.capture.calls.load(Ordering::SeqCst) > 0);
    assert_eq!(harness.reaper.peak_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(harness.capture.peak_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(harness.blocker.calls().last(), Some(&true));

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_batch_triggers_exactly_one_analysis() {
    let harness = Harness::new(focused());
    let controller = harness.controller(SessionSettings {
        capture_interval_ms: 50,
        ..fast_settings()
    });

    controller.set_on().await.unwrap();
    assert!(
        wait_for(
            || controller.status().last_is_productive.is_some(),
            Duration::from_secs(3)
        )
        .await
    );
    controller.set_off().await.unwrap();

    let batches = harness.analysis.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec![vec![0], vec![1], vec![2]]);

    let prompt = harness.analysis.prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("write tests"));

    let status = controller.status();
    assert_eq!(status.last_is_productive, Some(true));
    assert_eq!(status.last_analysis.as_deref(), Some("Nice work on the tests!"));
    assert_eq!(status.last_raw.as_deref(), Some(focused().raw.as_str()));
    assert!(status.last_analyzed_at.is_some());

    // Productive verdicts stay quiet by default
    sleep(Duration::from_millis(50)).await;
    assert!(harness.notifier.announcements().is_empty());

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unproductive_verdict_is_announced_once() {
    let harness = Harness::new(distracted());
    let controller = harness.controller(SessionSettings {
        capture_interval_ms: 50,
        ..fast_settings()
    });

    controller.set_on().await.unwrap();
    assert!(
        wait_for(
            || !harness.notifier.announcements().is_empty(),
            Duration::from_secs(3)
        )
        .await
    );
    controller.set_off().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(
        harness.notifier.announcements(),
        vec![(false, "Hey, I noticed a game.".to_string())]
    );
    let status = controller.status();
    assert_eq!(status.last_is_productive, Some(false));
    assert_eq!(status.last_analysis.as_deref(), Some("Hey, I noticed a game."));
    assert_eq!(status.task, "write tests");

    // Persistence failures are logged and do not stop anything
    assert!(
        wait_for(
            || harness.persistence.analyses.lock().unwrap().len() == 1,
            Duration::from_secs(1)
        )
        .await
    );
    assert!(harness.persistence.images.load(Ordering::SeqCst) >= 3);

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn productive_verdicts_announced_when_enabled() {
    let harness = Harness::new(focused());
    let controller = harness.controller(SessionSettings {
        capture_interval_ms: 50,
        notify_productive: true,
        ..fast_settings()
    });

    controller.set_on().await.unwrap();
    assert!(
        wait_for(
            || !harness.notifier.announcements().is_empty(),
            Duration::from_secs(3)
        )
        .await
    );
    controller.cleanup().await;

    assert_eq!(
        harness.notifier.announcements()[0],
        (true, "Nice work on the tests!".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_analysis_keeps_batch_for_retry() {
    let harness = Harness::new(distracted());
    harness
        .analysis
        .script
        .lock()
        .unwrap()
        .push_back(Err(anyhow!("model unavailable")));
    let controller = harness.controller(fast_settings());

    controller.set_on().await.unwrap();
    assert!(wait_for(|| harness.analysis.calls() >= 2, Duration::from_secs(3)).await);
    controller.set_off().await.unwrap();

    let batches = harness.analysis.batches.lock().unwrap().clone();
    assert_eq!(batches[0], vec![vec![0], vec![1], vec![2]]);
    // Retry happens on the next capture with the oldest image dropped
    assert_eq!(batches[1], vec![vec![1], vec![2], vec![3]]);

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capture_panics_are_transient() {
    let harness = Harness::new(focused());
    harness.capture.panic_on_odd_calls.store(true, Ordering::SeqCst);
    let controller = harness.controller(fast_settings());

    controller.set_on().await.unwrap();
    assert!(wait_for(|| harness.analysis.calls() >= 1, Duration::from_secs(3)).await);
    controller.set_off().await.unwrap();

    let batches = harness.analysis.batches.lock().unwrap().clone();
    assert_eq!(batches[0], vec![vec![0], vec![2], vec![4]]);

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stopping_with_partial_batch_skips_analysis() {
    let harness = Harness::new(distracted());
    let controller = harness.controller(SessionSettings {
        capture_interval_ms: 200,
        ..fast_settings()
    });

    controller.set_on().await.unwrap();
    assert!(
        wait_for(
            || harness.capture.calls.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(1)
        )
        .await
    );
    controller.set_off().await.unwrap();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(harness.analysis.calls(), 0);
    assert!(harness.notifier.announcements().is_empty());
    assert!(harness.capture.calls.load(Ordering::SeqCst) < 3);

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn short_break_returns_to_on() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());

    controller.set_on().await.unwrap();
    controller.set_break(0.01).await.unwrap();

    let status = controller.status();
    assert_eq!(status.mode, Mode::Break);
    assert_eq!(status.break_remaining_secs, Some(1));
    assert_eq!(harness.blocker.calls(), vec![true, false]);

    assert!(wait_for(|| controller.mode() == Mode::On, Duration::from_secs(3)).await);
    assert_eq!(harness.blocker.calls(), vec![true, false, true]);
    assert_eq!(controller.status().break_remaining_secs, None);

    let reaped = harness.reaper.calls.load(Ordering::SeqCst);
    assert!(
        wait_for(
            || harness.reaper.calls.load(Ordering::SeqCst) > reaped,
            Duration::from_secs(1)
        )
        .await
    );

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn new_break_replaces_running_one() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());

    controller.set_on().await.unwrap();
    controller.set_break(5.0).await.unwrap();
    controller.set_break(3.0).await.unwrap();

    let remaining = controller.status().break_remaining_secs.unwrap();
    assert!((170..=180).contains(&remaining), "remaining {remaining}");
    assert_eq!(harness.blocker.calls(), vec![true, false, false]);

    // Ending early cancels the break without a later completion
    controller.set_on().await.unwrap();
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(controller.mode(), Mode::On);
    assert_eq!(harness.blocker.calls(), vec![true, false, false, true]);

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn superseded_short_break_never_completes() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());

    controller.set_on().await.unwrap();
    controller.set_break(0.01).await.unwrap();
    controller.set_break(5.0).await.unwrap();
    sleep(Duration::from_millis(1_500)).await;

    assert_eq!(controller.mode(), Mode::Break);
    assert_eq!(harness.blocker.calls(), vec![true, false, false]);

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_break_lengths_are_rejected() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());
    controller.set_on().await.unwrap();

    let too_long = [MAX_BREAK_MINUTES + 1.0, 2e17, f64::MAX];
    for minutes in [0.0, -1.0, f64::NAN, f64::INFINITY].into_iter().chain(too_long) {
        assert!(matches!(
            controller.set_break(minutes).await,
            Err(SessionError::InvalidBreak(_))
        ));
    }
    assert_eq!(controller.mode(), Mode::On);
    assert_eq!(harness.blocker.calls(), vec![true]);

    // Rejection happens before anything is torn down
    let reaped = harness.reaper.calls.load(Ordering::SeqCst);
    assert!(
        wait_for(
            || harness.reaper.calls.load(Ordering::SeqCst) > reaped,
            Duration::from_secs(1)
        )
        .await
    );

    controller.set_break(MAX_BREAK_MINUTES).await.unwrap();
    assert_eq!(controller.mode(), Mode::Break);
    assert_eq!(
        controller.status().break_remaining_secs,
        Some((MAX_BREAK_MINUTES * 60.0) as u64)
    );

    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_failure_leaves_mode_unchanged() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());

    harness.blocker.fail.store(true, Ordering::SeqCst);
    assert!(matches!(
        controller.set_on().await,
        Err(SessionError::Blocking(_))
    ));
    assert_eq!(controller.mode(), Mode::Off);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.reaper.calls.load(Ordering::SeqCst), 0);

    harness.blocker.fail.store(false, Ordering::SeqCst);
    controller.set_on().await.unwrap();

    harness.blocker.fail.store(true, Ordering::SeqCst);
    assert!(matches!(
        controller.set_off().await,
        Err(SessionError::Blocking(_))
    ));
    assert_eq!(controller.mode(), Mode::On);

    // Enforcement for On is back in place
    let reaped = harness.reaper.calls.load(Ordering::SeqCst);
    assert!(
        wait_for(
            || harness.reaper.calls.load(Ordering::SeqCst) > reaped,
            Duration::from_secs(1)
        )
        .await
    );

    harness.blocker.fail.store(false, Ordering::SeqCst);
    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_failure_during_break_keeps_break() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());

    controller.set_on().await.unwrap();
    controller.set_break(5.0).await.unwrap();

    harness.blocker.fail.store(true, Ordering::SeqCst);
    assert!(matches!(
        controller.set_on().await,
        Err(SessionError::Blocking(_))
    ));

    let status = controller.status();
    assert_eq!(status.mode, Mode::Break);
    let remaining = status.break_remaining_secs.unwrap();
    assert!((290..=300).contains(&remaining), "remaining {remaining}");

    harness.blocker.fail.store(false, Ordering::SeqCst);
    controller.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cleanup_is_idempotent_and_closes() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());

    controller.set_on().await.unwrap();
    controller.set_break(5.0).await.unwrap();
    controller.cleanup().await;
    controller.cleanup().await;

    assert!(controller.is_closed());
    assert_eq!(controller.mode(), Mode::Off);
    assert_eq!(controller.status().break_remaining_secs, None);
    assert_eq!(harness.blocker.calls(), vec![true, false, false]);

    assert!(matches!(controller.set_on().await, Err(SessionError::Closed)));
    assert!(matches!(controller.set_off().await, Err(SessionError::Closed)));
    assert!(matches!(
        controller.set_break(1.0).await,
        Err(SessionError::Closed)
    ));

    let reaped = harness.reaper.calls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.reaper.calls.load(Ordering::SeqCst), reaped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cleanup_unblocks_even_when_off() {
    let harness = Harness::new(focused());
    let controller = harness.controller(fast_settings());

    controller.cleanup().await;
    assert_eq!(harness.blocker.calls(), vec![false]);
}

#[test]
fn construction_rejects_bad_input() {
    let harness = Harness::new(focused());
    let collaborators = || Collaborators {
        blocker: harness.blocker.clone(),
        reaper: harness.reaper.clone(),
        capture: harness.capture.clone(),
        analysis: harness.analysis.clone(),
        notifier: harness.notifier.clone(),
        persistence: harness.persistence.clone(),
    };

    assert!(matches!(
        SessionController::new("  ", fast_settings(), collaborators()),
        Err(SessionError::Config(_))
    ));
    assert!(matches!(
        SessionController::new(
            "write tests",
            SessionSettings {
                captures_before_analysis: 0,
                ..fast_settings()
            },
            collaborators()
        ),
        Err(SessionError::Config(_))
    ));
}
