use std::{
    path::Path,
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread that owns the connection. Dropping the sender ends its loop.
struct JournalThread {
    jobs: Option<mpsc::Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for JournalThread {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Journal thread panicked");
            }
        }
    }
}

/// SQLite journal of sessions, captures and analyses.
///
/// The connection is opened and migrated on the caller's thread, then moved
/// to a dedicated thread that runs queries one at a time.
#[derive(Clone)]
pub struct Database {
    thread: Arc<JournalThread>,
}

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create journal directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open journal at {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", true)
        .context("failed to enable foreign keys")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("Journal stays in rollback mode: {err}");
    }

    run_migrations(&mut conn)?;
    Ok(conn)
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = open_connection(path)?;

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("deepwork-journal".into())
            .spawn(move || {
                for job in jobs_rx {
                    job(&mut conn);
                }
                info!("Journal thread shutting down");
            })
            .context("failed to spawn journal thread")?;

        info!("Journal opened at {}", path.display());
        Ok(Self {
            thread: Arc::new(JournalThread {
                jobs: Some(jobs_tx),
                handle: Some(handle),
            }),
        })
    }

    /// Runs `query` on the journal thread and waits for its result.
    pub(crate) async fn with_conn<F, T>(&self, query: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let jobs = self
            .thread
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("journal is shut down"))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        jobs.send(Box::new(move |conn| {
            // The caller may have given up waiting
            let _ = reply_tx.send(query(conn));
        }))
        .map_err(|_| anyhow!("journal thread is gone"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("journal thread dropped the query"))?
    }
}
