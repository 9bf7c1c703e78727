use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    models::{AnalysisRecord, CaptureRecord},
};

fn row_to_analysis(row: &Row) -> rusqlite::Result<AnalysisRecord> {
    Ok(AnalysisRecord {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        analysis_key: row.get("analysis_key")?,
        is_productive: row.get("is_productive")?,
        reason: row.get("reason")?,
        raw: row.get("raw")?,
        path: row.get("path")?,
        analyzed_at: row.get("analyzed_at")?,
    })
}

fn row_to_capture(row: &Row) -> rusqlite::Result<CaptureRecord> {
    Ok(CaptureRecord {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        capture_key: row.get("capture_key")?,
        path: row.get("path")?,
        byte_len: row.get("byte_len")?,
        captured_at: row.get("captured_at")?,
    })
}

impl Database {
    pub async fn insert_capture(&self, capture: &CaptureRecord) -> Result<()> {
        let record = capture.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO captures (session_id, capture_key, path, byte_len, captured_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.session_id,
                    record.capture_key,
                    record.path,
                    record.byte_len,
                    record.captured_at,
                ],
            )
            .context("failed to insert capture")?;
            Ok(())
        })
        .await
    }

    pub async fn insert_analysis(&self, analysis: &AnalysisRecord) -> Result<()> {
        let record = analysis.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO analyses (session_id, analysis_key, is_productive, reason, raw, path, analyzed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.session_id,
                    record.analysis_key,
                    record.is_productive,
                    record.reason,
                    record.raw,
                    record.path,
                    record.analyzed_at,
                ],
            )
            .context("failed to insert analysis")?;
            Ok(())
        })
        .await
    }

    pub async fn get_captures_for_session(&self, session_id: &str) -> Result<Vec<CaptureRecord>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, capture_key, path, byte_len, captured_at
                 FROM captures
                 WHERE session_id = ?1
                 ORDER BY capture_key ASC, id ASC",
            )?;
            let captures = stmt
                .query_map(params![session_id], row_to_capture)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(captures)
        })
        .await
    }

    pub async fn get_analyses_for_session(&self, session_id: &str) -> Result<Vec<AnalysisRecord>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, analysis_key, is_productive, reason, raw, path, analyzed_at
                 FROM analyses
                 WHERE session_id = ?1
                 ORDER BY analysis_key ASC, id ASC",
            )?;
            let analyses = stmt
                .query_map(params![session_id], row_to_analysis)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(analyses)
        })
        .await
    }
}
