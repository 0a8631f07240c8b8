use crate::infrastructure::clock::{Clock, utc_from_ms};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const COMMAND_LOG_FILE: &str = "commands.log";

/// JSON-lines audit trail of accepted and rejected commands, stamped by the injected clock.
#[derive(Default)]
pub struct CommandLog {
    target: Option<(PathBuf, Arc<dyn Clock>)>,
    guard: Mutex<()>,
}

impl CommandLog {
    pub fn in_dir(logs_dir: &Path, clock: Arc<dyn Clock>) -> Self {
        Self {
            target: Some((logs_dir.join(COMMAND_LOG_FILE), clock)),
            guard: Mutex::new(()),
        }
    }

    /// Log that only forwards to the `log` facade.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.target.as_ref().map(|(path, _)| path.as_path())
    }

    pub fn info(&self, command: &str, message: &str) {
        log::info!("{command}: {message}");
        self.append("info", command, message);
    }

    pub fn warn(&self, command: &str, message: &str) {
        log::warn!("{command}: {message}");
        self.append("warn", command, message);
    }

    pub fn error(&self, command: &str, message: &str) {
        log::error!("{command}: {message}");
        self.append("error", command, message);
    }

    fn append(&self, level: &str, command: &str, message: &str) {
        let Some((path, clock)) = self.target.as_ref() else {
            return;
        };
        let Ok(_guard) = self.guard.lock() else {
            return;
        };
        let payload = serde_json::json!({
            "timestamp": utc_from_ms(clock.now_ms()).to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use std::fs;

    #[test]
    fn appends_one_json_line_per_entry() {
        let dir = std::env::temp_dir().join(format!("studyclock-command-log-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create log dir");

        // 2026-02-16T09:00:00Z
        let log = CommandLog::in_dir(&dir, Arc::new(ManualClock::new(1_771_232_400_000)));
        log.info("start", "accepted duration=1500");
        log.warn("pause", "ignored in phase idle");

        let raw = fs::read_to_string(log.path().expect("log path")).expect("read log");
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["command"], "start");
        assert_eq!(lines[1]["level"], "warn");
        assert_eq!(lines[0]["timestamp"], "2026-02-16T09:00:00+00:00");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let log = CommandLog::disabled();
        log.error("reset", "ledger write failed");
        assert!(log.path().is_none());
    }
}
