use std::{path::Path, sync::Mutex};
use sysinfo::{Process, ProcessRefreshKind, ProcessesToUpdate, System};

use super::ProcessReaper;

/// Kills configured applications by scanning the process table.
pub struct SysinfoReaper {
    system: Mutex<System>,
    /// Lowercased executable stems, e.g. "discord" for "Discord.exe"
    targets: Vec<String>,
    /// Our own PID so we never kill ourselves
    own_pid: u32,
}

impl SysinfoReaper {
    pub fn new(processes: &[String]) -> Self {
        let targets = processes
            .iter()
            .map(|name| executable_stem(name))
            .filter(|stem| !stem.is_empty())
            .collect::<Vec<_>>();

        log::info!("[reaper] watching for {:?}", targets);

        Self {
            system: Mutex::new(System::new()),
            targets,
            own_pid: std::process::id(),
        }
    }

    fn is_target(&self, process: &Process) -> bool {
        let name = executable_stem(&process.name().to_string_lossy());
        if self.targets.contains(&name) {
            return true;
        }

        process
            .exe()
            .and_then(|exe| exe.file_name())
            .map(|file| self.targets.contains(&executable_stem(&file.to_string_lossy())))
            .unwrap_or(false)
    }
}

impl ProcessReaper for SysinfoReaper {
    fn kill_targets(&self) -> bool {
        if self.targets.is_empty() {
            return false;
        }

        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            ProcessRefreshKind::everything(),
        );

        let mut killed_any = false;
        for (pid, process) in system.processes() {
            if pid.as_u32() == self.own_pid || !self.is_target(process) {
                continue;
            }

            if process.kill() {
                log::info!(
                    "[reaper] sent termination signal to {} (pid {})",
                    process.name().to_string_lossy(),
                    pid
                );
                killed_any = true;
            } else {
                log::warn!(
                    "[reaper] could not terminate {} (pid {})",
                    process.name().to_string_lossy(),
                    pid
                );
            }
        }

        killed_any
    }
}

/// "Discord.exe" and "/Applications/Discord" both become "discord".
fn executable_stem(name: &str) -> String {
    let file = Path::new(name)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());

    let stem = match file.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("exe") || ext.eq_ignore_ascii_case("app") => {
            stem.to_string()
        }
        _ => file,
    };

    stem.trim().to_lowercase()
}
