use anyhow::{Context, Result};
use log::{info, warn};
use std::{fs, path::PathBuf, process::Command};

use super::HostsBlocker;
use crate::{config::BlockingSettings, error::SessionError};

/// Blocks sites by redirecting them in the hosts file.
///
/// Every line we add carries `marker`; unblocking removes exactly those lines
/// and leaves the rest of the file alone.
pub struct HostsFileBlocker {
    path: PathBuf,
    redirect_ip: String,
    marker: String,
    sites: Vec<String>,
}

impl HostsFileBlocker {
    pub fn new(settings: &BlockingSettings) -> std::result::Result<Self, SessionError> {
        if !settings.hosts_path.is_file() {
            return Err(SessionError::Config(format!(
                "hosts file not found at {}",
                settings.hosts_path.display()
            )));
        }
        if settings.marker.trim().is_empty() {
            return Err(SessionError::Config("hosts marker must not be empty".into()));
        }

        Ok(Self {
            path: settings.hosts_path.clone(),
            redirect_ip: settings.redirect_ip.clone(),
            marker: settings.marker.clone(),
            sites: settings.sites.clone(),
        })
    }

    fn rewrite(&self, contents: &str, block: bool) -> (String, bool) {
        let mut had_marker = false;
        let mut output = String::with_capacity(contents.len());

        for line in contents.lines() {
            if line.contains(&self.marker) {
                had_marker = true;
                continue;
            }
            output.push_str(line);
            output.push('\n');
        }

        if block {
            for site in &self.sites {
                output.push_str(&format!("{}\t{}\t\t{}\n", self.redirect_ip, site, self.marker));
            }
        }

        (output, had_marker)
    }
}

impl HostsBlocker for HostsFileBlocker {
    fn apply(&self, block: bool) -> Result<()> {
        info!(
            "{} websites in {}",
            if block { "Blocking" } else { "Unblocking" },
            self.path.display()
        );

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read hosts file {}", self.path.display()))?;

        let (rewritten, had_marker) = self.rewrite(&contents, block);

        fs::write(&self.path, rewritten).with_context(|| {
            format!(
                "failed to write hosts file {} (elevated privileges required?)",
                self.path.display()
            )
        })?;

        if block || had_marker {
            flush_dns();
        }
        Ok(())
    }
}

fn flush_dns() {
    let argv: &[&str] = if cfg!(target_os = "windows") {
        &["ipconfig", "/flushdns"]
    } else if cfg!(target_os = "macos") {
        &["dscacheutil", "-flushcache"]
    } else {
        &["resolvectl", "flush-caches"]
    };

    match Command::new(argv[0]).args(&argv[1..]).output() {
        Ok(output) if output.status.success() => info!("DNS cache flushed"),
        Ok(output) => warn!(
            "DNS flush exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(err) => warn!("Failed to run {}: {err}", argv[0]),
    }
}
