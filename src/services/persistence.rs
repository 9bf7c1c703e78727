use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{AnalysisResult, PersistenceService};
use crate::db::{AnalysisRecord, CaptureRecord, Database};

const SCREENSHOT_DIR: &str = "screenshots";
const ANALYSIS_DIR: &str = "analysis";

/// Text written next to each analysis: the prompt, a rule, then the raw answer.
pub fn analysis_report(prompt: &str, raw: &str) -> String {
    format!("PROMPT:\n{prompt}\n\n{}\n\nANALYSIS:\n{raw}", "=".repeat(50))
}

/// Writes captures and analyses under a results directory and journals each
/// one in SQLite when a database is attached.
pub struct ResultsStore {
    directory: PathBuf,
    db: Option<Database>,
    session_id: String,
}

impl ResultsStore {
    pub fn new(directory: impl Into<PathBuf>, db: Option<Database>, session_id: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            db,
            session_id: session_id.into(),
        }
    }

    pub fn image_path(&self, key: &str) -> PathBuf {
        self.directory
            .join(SCREENSHOT_DIR)
            .join(format!("productivity_{key}.png"))
    }

    pub fn analysis_path(&self, key: &str) -> PathBuf {
        self.directory
            .join(ANALYSIS_DIR)
            .join(format!("productivity_analysis_{key}.txt"))
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

#[async_trait]
impl PersistenceService for ResultsStore {
    async fn save_image(&self, bytes: &[u8], key: &str) -> Result<()> {
        let path = self.image_path(key);
        write_file(&path, bytes).await?;
        log::debug!("Saved capture to {}", path.display());

        if let Some(db) = &self.db {
            db.insert_capture(&CaptureRecord {
                id: None,
                session_id: self.session_id.clone(),
                capture_key: key.to_string(),
                path: path.to_string_lossy().into_owned(),
                byte_len: bytes.len() as u64,
                captured_at: Utc::now(),
            })
            .await
            .context("failed to journal capture")?;
        }
        Ok(())
    }

    async fn save_analysis(&self, prompt: &str, result: &AnalysisResult, key: &str) -> Result<()> {
        let path = self.analysis_path(key);
        write_file(&path, analysis_report(prompt, &result.raw).as_bytes()).await?;
        log::info!("Saved analysis to {}", path.display());

        if let Some(db) = &self.db {
            db.insert_analysis(&AnalysisRecord {
                id: None,
                session_id: self.session_id.clone(),
                analysis_key: key.to_string(),
                is_productive: result.is_productive,
                reason: result.reason.clone(),
                raw: result.raw.clone(),
                path: Some(path.to_string_lossy().into_owned()),
                analyzed_at: result.analyzed_at,
            })
            .await
            .context("failed to journal analysis")?;
        }
        Ok(())
    }
}
