pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod session;
pub mod utils;
pub mod workers;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use tokio::io::BufReader;
use uuid::Uuid;

use cli::Args;
use config::Config;
use db::{Database, SessionRecord};
use services::{
    CommandCapture, HostsFileBlocker, ResultsStore, SpeechNotifier, SysinfoReaper, VisionClient,
};
use session::{Collaborators, SessionController};

pub use error::SessionError;

/// Opens the journal and records this session. The session runs without a
/// journal when the database is unavailable.
async fn open_journal(config: &Config, record: &SessionRecord) -> Option<Database> {
    let db = match Database::new(config.results.database.clone()) {
        Ok(db) => db,
        Err(err) => {
            warn!("Session journal unavailable: {err:#}");
            return None;
        }
    };

    match db.close_unfinished_sessions(record.started_at).await {
        Ok(0) => {}
        Ok(count) => warn!("Closed {count} session(s) left open by an earlier run"),
        Err(err) => warn!("Failed to close unfinished sessions: {err:#}"),
    }

    if let Err(err) = db.insert_session(record).await {
        warn!("Failed to record session start: {err:#}");
    }
    Some(db)
}

pub async fn run() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("deepwork starting up...");

    let config = Config::load(args.config.as_deref())?;
    config.validate()?;

    let record = SessionRecord {
        id: Uuid::new_v4().to_string(),
        task: args.task.clone(),
        started_at: Utc::now(),
        ended_at: None,
    };

    // Configuration errors surface before anything touches the system
    let blocker = HostsFileBlocker::new(&config.blocking)?;
    let analysis = VisionClient::new(&config.analysis)?;

    let db = open_journal(&config, &record).await;

    let collaborators = Collaborators {
        blocker: Arc::new(blocker),
        reaper: Arc::new(SysinfoReaper::new(&config.blocking.processes)),
        capture: Arc::new(CommandCapture::new(config.capture.sources.clone())),
        analysis: Arc::new(analysis),
        notifier: Arc::new(SpeechNotifier::new(config.speech.command.clone())),
        persistence: Arc::new(ResultsStore::new(
            config.results.directory.clone(),
            db.clone(),
            record.id.clone(),
        )),
    };

    let controller = SessionController::new(args.task, config.session.clone(), collaborators)?;
    info!("Task: {}", controller.task());

    let outcome = match controller.set_on().await {
        Ok(()) => cli::run_interactive(&controller, BufReader::new(tokio::io::stdin())).await,
        Err(err) => Err(err.into()),
    };

    controller.cleanup().await;

    if let Some(db) = db {
        if let Err(err) = db.finish_session(&record.id, Utc::now()).await {
            warn!("Failed to record session end: {err:#}");
        }
    }

    info!("deepwork finished");
    outcome
}
