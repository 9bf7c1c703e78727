use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{connection::Database, models::SessionRecord};

fn row_to_session(row: &Row) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get("id")?,
        task: row.get("task")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let record = session.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, task, started_at, ended_at) VALUES (?1, ?2, ?3, ?4)",
                params![record.id, record.task, record.started_at, record.ended_at],
            )
            .context("failed to insert session")?;
            Ok(())
        })
        .await
    }

    pub async fn finish_session(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sessions SET ended_at = ?1 WHERE id = ?2",
                params![ended_at, session_id],
            )
            .context("failed to finish session")?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task, started_at, ended_at FROM sessions WHERE id = ?1",
            )?;
            let session = stmt
                .query_row(params![session_id], row_to_session)
                .optional()?;
            Ok(session)
        })
        .await
    }

    /// Stamps `ended_at` on sessions left open by a crash. Returns how many.
    pub async fn close_unfinished_sessions(&self, ended_at: DateTime<Utc>) -> Result<usize> {
        self.with_conn(move |conn| {
            let closed = conn
                .execute(
                    "UPDATE sessions SET ended_at = ?1 WHERE ended_at IS NULL",
                    params![ended_at],
                )
                .context("failed to close unfinished sessions")?;
            Ok(closed)
        })
        .await
    }
}
