use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::SessionError;

/// Top-level configuration, read from `deepwork.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionSettings,
    pub blocking: BlockingSettings,
    pub capture: CaptureSettings,
    pub analysis: AnalysisSettings,
    pub speech: SpeechSettings,
    pub results: ResultsSettings,
}

/// Timing knobs for the supervisor and its workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub capture_interval_ms: u64,
    /// Captures collected before one analysis round trip.
    pub captures_before_analysis: usize,
    pub kill_interval_ms: u64,
    /// Upper bound on waiting for a worker to exit during a transition.
    pub stop_timeout_ms: u64,
    pub break_tick_ms: u64,
    /// Also speak productive verdicts, not only unproductive ones.
    pub notify_productive: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capture_interval_ms: 5_000,
            captures_before_analysis: 3,
            kill_interval_ms: 1_000,
            stop_timeout_ms: 5_000,
            break_tick_ms: 1_000,
            notify_productive: false,
        }
    }
}

impl SessionSettings {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn kill_interval(&self) -> Duration {
        Duration::from_millis(self.kill_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn break_tick(&self) -> Duration {
        Duration::from_millis(self.break_tick_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), SessionError> {
        if self.captures_before_analysis == 0 {
            return Err(SessionError::Config(
                "captures_before_analysis must be at least 1".into(),
            ));
        }
        let intervals = [
            ("capture_interval_ms", self.capture_interval_ms),
            ("kill_interval_ms", self.kill_interval_ms),
            ("break_tick_ms", self.break_tick_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(SessionError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingSettings {
    pub hosts_path: PathBuf,
    pub redirect_ip: String,
    /// Appended to every line we add so they can be found and removed later.
    pub marker: String,
    pub sites: Vec<String>,
    /// Executable names, with or without extension.
    pub processes: Vec<String>,
}

impl Default for BlockingSettings {
    fn default() -> Self {
        let hosts_path = if cfg!(target_os = "windows") {
            PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
        } else {
            PathBuf::from("/etc/hosts")
        };

        let sites = [
            "facebook.com",
            "linkedin.com",
            "discord.com",
            "reddit.com",
            "news.ycombinator.com",
            "lesswrong.com",
            "bsky.app",
            "x.com",
            "twitter.com",
            "mobile.twitter.com",
            "api.twitter.com",
        ]
        .iter()
        .flat_map(|site| {
            if site.matches('.').count() == 1 {
                vec![site.to_string(), format!("www.{site}")]
            } else {
                vec![site.to_string()]
            }
        })
        .collect();

        Self {
            hosts_path,
            redirect_ip: "127.0.0.1".into(),
            marker: "# BLOCKED_BY_DEEPWORK".into(),
            sites,
            processes: vec!["Discord".into(), "Telegram".into(), "Steam".into()],
        }
    }
}

/// One image producer invoked per capture tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSource {
    pub label: String,
    /// Program and arguments; the PNG is read from stdout.
    pub command: Vec<String>,
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Failures of optional sources are logged and the frame skipped.
    #[serde(default)]
    pub optional: bool,
}

fn default_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub sources: Vec<CaptureSource>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let mut sources = Vec::new();

        if cfg!(target_os = "macos") {
            sources.push(CaptureSource {
                label: "Screen".into(),
                command: ["screencapture", "-x", "-t", "png", "/dev/stdout"]
                    .map(String::from)
                    .to_vec(),
                scale: 1.0,
                optional: false,
            });
        } else if cfg!(target_os = "linux") {
            sources.push(CaptureSource {
                label: "Screen".into(),
                command: vec!["grim".into(), "-".into()],
                scale: 1.0,
                optional: false,
            });
            sources.push(CaptureSource {
                label: "Webcam".into(),
                command: [
                    "ffmpeg", "-loglevel", "error", "-f", "v4l2", "-i", "/dev/video0", "-frames:v",
                    "1", "-f", "image2pipe", "-vcodec", "png", "-",
                ]
                .map(String::from)
                .to_vec(),
                scale: 3.0,
                optional: true,
            });
        }

        Self { sources }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// OpenAI-compatible API root, e.g. a local Ollama server.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            model: "gemma3:4b".into(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 120,
        }
    }
}

impl AnalysisSettings {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn is_local(&self) -> bool {
        self.base_url.contains("localhost") || self.base_url.contains("127.0.0.1")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// TTS program and leading arguments; the message is appended. Empty logs only.
    pub command: Vec<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        let command = if cfg!(target_os = "macos") {
            vec!["say".into()]
        } else if cfg!(target_os = "linux") {
            vec!["espeak".into()]
        } else {
            Vec::new()
        };
        Self { command }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsSettings {
    pub directory: PathBuf,
    pub database: PathBuf,
}

impl Default for ResultsSettings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deepwork");

        Self {
            directory: PathBuf::from("results"),
            database: data_dir.join("deepwork.sqlite3"),
        }
    }
}

impl Config {
    /// Load configuration: explicit path, then the user config dir, then
    /// `./deepwork.toml`, then defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()));
        }

        let candidates = default_config_path()
            .into_iter()
            .chain(std::iter::once(PathBuf::from("deepwork.toml")));

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {e:#}", candidate.display());
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), SessionError> {
        self.session.validate()?;

        if self.blocking.sites.is_empty() {
            log::warn!("No sites configured for blocking");
        }
        if self.blocking.processes.is_empty() {
            log::warn!("No processes configured for termination");
        }
        if self.capture.sources.iter().all(|source| source.optional) {
            return Err(SessionError::Config(
                "at least one required capture source must be configured".into(),
            ));
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("deepwork").join("deepwork.toml"))
}
