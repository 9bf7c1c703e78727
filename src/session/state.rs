use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::AnalysisResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Sites blocked, distracting apps killed, captures analyzed.
    On,
    /// Nothing enforced.
    #[default]
    Off,
    /// Temporarily unenforced; returns to On when the countdown finishes.
    Break,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Mode::On => "on",
            Mode::Off => "off",
            Mode::Break => "break",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub task: String,
    pub mode: Mode,
    /// Only meaningful while `mode` is `Break`.
    pub break_remaining_secs: Option<u64>,
    pub last_analysis: Option<String>,
    /// Model response exactly as received.
    pub last_raw: Option<String>,
    pub last_is_productive: Option<bool>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    /// Bumped whenever a break starts or is cancelled so late countdown
    /// events from an older break can be recognised and dropped.
    pub break_generation: u64,
}

impl SessionState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            mode: Mode::Off,
            break_remaining_secs: None,
            last_analysis: None,
            last_raw: None,
            last_is_productive: None,
            last_analyzed_at: None,
            break_generation: 0,
        }
    }

    pub fn record_analysis(&mut self, result: &AnalysisResult) {
        let text = if result.reason.trim().is_empty() {
            result.raw.clone()
        } else {
            result.reason.clone()
        };
        self.last_analysis = Some(text);
        self.last_raw = Some(result.raw.clone());
        self.last_is_productive = Some(result.is_productive);
        self.last_analyzed_at = Some(result.analyzed_at);
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode != Mode::Break {
            self.break_remaining_secs = None;
        }
    }

    /// Starts a new break generation and returns it.
    pub fn next_break_generation(&mut self) -> u64 {
        self.break_generation = self.break_generation.wrapping_add(1);
        self.break_generation
    }

    /// Records a countdown tick if it belongs to the current break.
    pub fn apply_break_tick(&mut self, generation: u64, remaining_secs: u64) -> bool {
        if generation != self.break_generation {
            return false;
        }
        self.break_remaining_secs = Some(remaining_secs);
        true
    }

    /// Back to a fresh Off state for the same task.
    pub fn reset(&mut self) {
        let generation = self.break_generation.wrapping_add(1);
        *self = Self::new(std::mem::take(&mut self.task));
        self.break_generation = generation;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            break_remaining_secs: match self.mode {
                Mode::Break => self.break_remaining_secs,
                _ => None,
            },
            last_analysis: self.last_analysis.clone(),
            last_raw: self.last_raw.clone(),
            last_is_productive: self.last_is_productive,
            last_analyzed_at: self.last_analyzed_at,
            task: self.task.clone(),
        }
    }
}

/// Point-in-time copy of the session returned by `status()`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub break_remaining_secs: Option<u64>,
    /// The verdict's reason, or the raw response when it gave none.
    pub last_analysis: Option<String>,
    pub last_raw: Option<String>,
    pub last_is_productive: Option<bool>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub task: String,
}
