//! Command-line entry and the interactive console.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::{
    error::SessionError,
    session::{Mode, SessionController},
};

/// Must be typed verbatim before turning blocking off or taking a break.
pub const CONFIRMATION_PHRASE: &str = "I will not stop cool deepwork session";

/// Breaks longer than this ask for an extra `yes`.
pub const LONG_BREAK_MINUTES: f64 = 60.0;

#[derive(Parser, Debug)]
#[command(name = "deepwork")]
#[command(about = "Block distractions and check in on your progress", long_about = None)]
pub struct Args {
    /// What you intend to work on; every productivity check is judged against it
    #[arg(short, long)]
    pub task: String,

    /// Path to deepwork.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    On,
    Off,
    Break(f64),
    Status,
    Exit,
}

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("Usage: break <minutes>  (e.g. 'break 5' for a 5-minute break)")]
    BreakUsage,

    #[error("Invalid duration: '{0}'. Please enter a number of minutes.")]
    InvalidMinutes(String),

    #[error("Break duration must be a positive number of minutes.")]
    NonPositiveMinutes,

    #[error("Invalid command: '{0}'. Please use 'on', 'off', 'break <min>', 'status' or 'exit'.")]
    Unknown(String),
}

pub fn parse_command(line: &str) -> std::result::Result<Command, CommandError> {
    let normalized = line.trim().to_lowercase();
    let parts: Vec<&str> = normalized.split_whitespace().collect();

    match parts.as_slice() {
        [] => Err(CommandError::Empty),
        ["on"] => Ok(Command::On),
        ["off"] => Ok(Command::Off),
        ["status"] => Ok(Command::Status),
        ["exit"] | ["quit"] => Ok(Command::Exit),
        ["break", raw] => {
            let minutes: f64 = raw
                .parse()
                .map_err(|_| CommandError::InvalidMinutes(raw.to_string()))?;
            if !minutes.is_finite() {
                return Err(CommandError::InvalidMinutes(raw.to_string()));
            }
            if minutes <= 0.0 {
                return Err(CommandError::NonPositiveMinutes);
            }
            Ok(Command::Break(minutes))
        }
        ["break", ..] => Err(CommandError::BreakUsage),
        _ => Err(CommandError::Unknown(line.trim().to_string())),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  on           - Block distractions");
    println!("  off          - Unblock distractions (requires confirmation)");
    println!("  break <min>  - Take a timed break, e.g. 'break 5'");
    println!("  status       - Show mode, break countdown and last analysis");
    println!("  exit         - Unblock and quit");
}

async fn ask<R>(lines: &mut Lines<R>, prompt: &str) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    println!("{prompt}");
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}

/// Asks for the confirmation phrase; EOF or a mismatch declines.
pub async fn confirm_phrase<R>(lines: &mut Lines<R>, action: &str) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let prompt = format!("To confirm the {action}, type: {CONFIRMATION_PHRASE}");
    match ask(lines, &prompt).await? {
        Some(answer) if answer == CONFIRMATION_PHRASE => Ok(true),
        Some(_) => {
            println!("Phrase did not match, {action} cancelled.");
            Ok(false)
        }
        None => Ok(false),
    }
}

pub async fn confirm_long_break<R>(lines: &mut Lines<R>, minutes: f64) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    println!("Warning: a {minutes}-minute break is longer than {LONG_BREAK_MINUTES} minutes.");
    let answer = ask(lines, "Type 'yes' to confirm the long break:").await?;
    let confirmed = matches!(answer.as_deref().map(str::to_lowercase).as_deref(), Some("yes"));
    if !confirmed {
        println!("Break cancelled.");
    }
    Ok(confirmed)
}

fn report(result: std::result::Result<(), SessionError>, done: &str) {
    match result {
        Ok(()) => println!("--- {done} ---"),
        Err(err) => println!("Error: {err}"),
    }
}

fn print_status(controller: &SessionController) {
    let status = controller.status();
    match serde_json::to_string_pretty(&status) {
        Ok(json) => println!("{json}"),
        Err(err) => log::warn!("Failed to render status: {err}"),
    }
}

/// Reads commands until `exit`, EOF or Ctrl-C. The caller owns cleanup.
pub async fn run_interactive<R>(controller: &SessionController, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    print_help();

    loop {
        println!("\nCurrent mode: {}. Enter command:", controller.mode());

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nCtrl+C detected, exiting...");
                None
            }
        };
        let Some(line) = line else {
            println!("\nEOF received, exiting...");
            break;
        };

        match parse_command(&line) {
            Ok(Command::On) => {
                if controller.mode() == Mode::On {
                    println!("Already on.");
                    continue;
                }
                report(controller.set_on().await, "Blocking activated");
            }
            Ok(Command::Off) => {
                if controller.mode() == Mode::Off {
                    println!("Already off.");
                    continue;
                }
                if !confirm_phrase(&mut lines, "'off' switch").await? {
                    continue;
                }
                report(controller.set_off().await, "Blocking deactivated");
            }
            Ok(Command::Break(minutes)) => {
                if minutes > LONG_BREAK_MINUTES && !confirm_long_break(&mut lines, minutes).await? {
                    continue;
                }
                if !confirm_phrase(&mut lines, "break").await? {
                    continue;
                }
                if controller.mode() == Mode::Break {
                    println!("Replacing the current break...");
                }
                report(
                    controller.set_break(minutes).await,
                    &format!("{minutes}-minute break started, type 'on' to end it early"),
                );
            }
            Ok(Command::Status) => print_status(controller),
            Ok(Command::Exit) => break,
            Err(CommandError::Empty) => {}
            Err(err) => println!("{err}"),
        }
    }

    Ok(())
}
