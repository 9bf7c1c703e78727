use std::process::Command;

use super::NotificationService;

/// What gets said for a verdict.
pub fn announcement_text(is_productive: bool, reason: &str) -> String {
    if is_productive {
        reason.to_string()
    } else {
        format!("You are probably not being productive. {reason}")
            .trim_end()
            .to_string()
    }
}

/// Speaks verdicts through an external TTS program such as `say` or `espeak`.
pub struct SpeechNotifier {
    command: Vec<String>,
}

impl SpeechNotifier {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl NotificationService for SpeechNotifier {
    fn announce(&self, is_productive: bool, reason: &str) {
        let message = announcement_text(is_productive, reason);
        log::info!("[tts] {message}");

        let Some((program, args)) = self.command.split_first() else {
            return;
        };

        match Command::new(program).args(args).arg(&message).status() {
            Ok(status) if status.success() => {}
            Ok(status) => log::warn!("[tts] {program} exited with {status}"),
            Err(err) => log::warn!("[tts] failed to run {program}: {err}"),
        }
    }
}
