//! Collaborators the session supervisor drives.
//!
//! Blocking I/O (hosts file, process table, capture commands, speech) sits
//! behind synchronous traits that the core calls from `spawn_blocking`.
//! Network and disk round trips that are naturally async use `async_trait`.

pub mod analysis;
pub mod capture;
pub mod hosts;
pub mod persistence;
pub mod reaper;
pub mod speech;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use analysis::{parse_verdict, productivity_prompt, VisionClient};
pub use capture::{stitch_frames, CommandCapture, Frame};
pub use hosts::HostsFileBlocker;
pub use persistence::ResultsStore;
pub use reaper::SysinfoReaper;
pub use speech::{announcement_text, SpeechNotifier};

/// Applies or removes the site-blocking side effect.
pub trait HostsBlocker: Send + Sync {
    fn apply(&self, block: bool) -> Result<()>;
}

/// Best-effort termination of distracting applications.
pub trait ProcessReaper: Send + Sync {
    /// Returns true when at least one process was signalled.
    fn kill_targets(&self) -> bool;
}

/// Produces one combined image per tick.
pub trait CaptureService: Send + Sync {
    fn capture_stitched(&self) -> Result<Vec<u8>>;
}

/// Verdict produced by one analysis round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_productive: bool,
    pub reason: String,
    pub raw: String,
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, images: &[Vec<u8>], prompt: &str) -> Result<Verdict>;
}

/// Fire-and-forget feedback to the user.
pub trait NotificationService: Send + Sync {
    fn announce(&self, is_productive: bool, reason: &str);
}

/// An analysis as recorded in session state and on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub is_productive: bool,
    pub reason: String,
    pub raw: String,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn from_verdict(verdict: Verdict, analyzed_at: DateTime<Utc>) -> Self {
        Self {
            is_productive: verdict.is_productive,
            reason: verdict.reason,
            raw: verdict.raw,
            analyzed_at,
        }
    }
}

/// Best-effort storage of captures and analyses, keyed by a sortable timestamp.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    async fn save_image(&self, bytes: &[u8], key: &str) -> Result<()>;
    async fn save_analysis(&self, prompt: &str, result: &AnalysisResult, key: &str) -> Result<()>;
}
