//! Line-oriented command host: reads commands from an async reader and prints clock
//! events and query results as JSON lines.

use crate::application::controller::{ClockCommand, TimerController};
use crate::application::session_clock::CommandOutcome;
use crate::application::tasks::TaskRegistry;
use crate::infrastructure::clock::Clock;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::events::ClockEvent;
use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Clock(ClockCommand),
    Status,
    Today,
    Summary { days: u32 },
    Tasks,
    NewTask { name: String },
    Help,
    Exit,
}

const HELP: &str = "commands: start <seconds> | pause | resume | reset | mode | break <minutes> | \
endbreak | quit | task <id|none> | tasks | newtask <name> | status | today | summary [days] | exit";

pub fn parse_command(line: &str) -> Result<HostCommand, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "start" => HostCommand::Clock(ClockCommand::Start(parse_number(rest, "start")?.unwrap_or(0))),
        "pause" => HostCommand::Clock(ClockCommand::Pause),
        "resume" => HostCommand::Clock(ClockCommand::Resume),
        "reset" => HostCommand::Clock(ClockCommand::Reset),
        "mode" => HostCommand::Clock(ClockCommand::ToggleMode),
        "break" => {
            let minutes = parse_number(rest, "break")?
                .ok_or_else(|| "break needs a number of minutes".to_string())?;
            let minutes = u32::try_from(minutes).map_err(|_| "break minutes out of range".to_string())?;
            HostCommand::Clock(ClockCommand::StartBreak(minutes))
        }
        "endbreak" => HostCommand::Clock(ClockCommand::EndBreak),
        "quit" => HostCommand::Clock(ClockCommand::QuitBreak),
        "task" => {
            let task_id = match rest {
                "" | "none" => None,
                id => Some(id.to_string()),
            };
            HostCommand::Clock(ClockCommand::SetActiveTask(task_id))
        }
        "tasks" => HostCommand::Tasks,
        "newtask" => HostCommand::NewTask {
            name: rest.to_string(),
        },
        "status" => HostCommand::Status,
        "today" => HostCommand::Today,
        "summary" => {
            let days = parse_number(rest, "summary")?.unwrap_or(7).clamp(1, 366);
            HostCommand::Summary { days: days as u32 }
        }
        "help" | "?" => HostCommand::Help,
        "exit" => HostCommand::Exit,
        "" => return Err("empty command".to_string()),
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(command)
}

fn parse_number(raw: &str, command: &str) -> Result<Option<u64>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| format!("{command} expects a whole number, got '{raw}'"))
}

pub struct Host {
    controller: TimerController,
    tasks: Arc<TaskRegistry>,
    clock: Arc<dyn Clock>,
}

impl Host {
    pub fn new(controller: TimerController, tasks: Arc<TaskRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            controller,
            tasks,
            clock,
        }
    }

    /// Runs until `exit` or end of input. Events are printed as they arrive.
    pub async fn run<R, W>(
        &self,
        reader: R,
        writer: &mut W,
        mut events: UnboundedReceiver<ClockEvent>,
    ) -> Result<(), InfraError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut events_open = true;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(HostCommand::Exit) => break,
                        Ok(command) => {
                            let response = self.execute(command).await;
                            write_line(writer, &response).await?;
                        }
                        Err(message) => {
                            write_line(writer, &json!({"error": message})).await?;
                        }
                    }
                    // Surface events caused by the command right after its response.
                    while let Ok(event) = events.try_recv() {
                        write_line(writer, &serde_json::to_value(&event)?).await?;
                    }
                }
                event = events.recv(), if events_open => {
                    match event {
                        Some(event) => write_line(writer, &serde_json::to_value(&event)?).await?,
                        None => events_open = false,
                    }
                }
            }
        }

        self.controller.shutdown().await;
        Ok(())
    }

    pub async fn execute(&self, command: HostCommand) -> serde_json::Value {
        match command {
            HostCommand::Clock(command) => {
                let label = format!("{command:?}");
                let outcome = self.controller.dispatch(command).await;
                match outcome {
                    CommandOutcome::Applied => {
                        json!({"command": label, "applied": true})
                    }
                    CommandOutcome::Ignored(reason) => {
                        json!({"command": label, "applied": false, "reason": reason})
                    }
                }
            }
            HostCommand::Status => json!({"status": self.controller.snapshot().await}),
            HostCommand::Today => {
                let ledger = self
                    .controller
                    .with_session(|session| session.ledger().clone())
                    .await;
                let date = ledger.zone().date_of(self.clock.now_ms());
                json!({"today": ledger.fetch_day(date).await})
            }
            HostCommand::Summary { days } => {
                let result = self
                    .controller
                    .with_session(|session| {
                        let zone = session.ledger().zone();
                        let end = zone.date_of(self.clock.now_ms());
                        let start = end - ChronoDuration::days(i64::from(days) - 1);
                        session.ledger().summary(start, end)
                    })
                    .await;
                match result {
                    Ok(summary) => json!({"summary": summary}),
                    Err(error) => json!({"error": error.to_string()}),
                }
            }
            HostCommand::Tasks => json!({"tasks": self.tasks.list()}),
            HostCommand::NewTask { name } => match self.tasks.create(&name, None) {
                Ok(task) => json!({"task": task}),
                Err(error) => json!({"error": error.to_string()}),
            },
            HostCommand::Help => json!({"help": HELP}),
            HostCommand::Exit => json!({"exit": true}),
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, value: &serde_json::Value) -> Result<(), InfraError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session_clock::tests::Fixture;
    use crate::infrastructure::events::ChannelEventSink;
    use tokio::io::BufReader;
    use tokio::time::Duration;

    #[test]
    fn parses_known_commands() {
        assert_eq!(
            parse_command("start 1500"),
            Ok(HostCommand::Clock(ClockCommand::Start(1500)))
        );
        assert_eq!(
            parse_command("  BREAK 5 "),
            Ok(HostCommand::Clock(ClockCommand::StartBreak(5)))
        );
        assert_eq!(
            parse_command("task none"),
            Ok(HostCommand::Clock(ClockCommand::SetActiveTask(None)))
        );
        assert_eq!(
            parse_command("task tsk-1"),
            Ok(HostCommand::Clock(ClockCommand::SetActiveTask(Some("tsk-1".to_string()))))
        );
        assert_eq!(parse_command("summary"), Ok(HostCommand::Summary { days: 7 }));
        assert_eq!(parse_command("quit"), Ok(HostCommand::Clock(ClockCommand::QuitBreak)));
        assert!(parse_command("break").is_err());
        assert!(parse_command("start soon").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[tokio::test]
    async fn scripted_session_prints_responses_and_events() {
        let mut fixture = Fixture::at("2026-02-16T09:00:00Z");
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        fixture.services.events = Arc::new(ChannelEventSink::new(sender));

        let controller = TimerController::new(
            fixture.session(),
            Duration::from_secs(3_600),
            Duration::from_secs(3_600),
        );
        let host = Host::new(
            controller,
            fixture.services.tasks.clone(),
            fixture.services.clock.clone(),
        );

        let script = "newtask Statistics\nstart 1500\nbogus\npause\nreset\ntoday\nexit\nstart 60\n";
        let mut output = Vec::new();
        host.run(BufReader::new(script.as_bytes()), &mut output, receiver)
            .await
            .expect("host loop");

        let lines: Vec<serde_json::Value> = String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();

        assert_eq!(lines[0]["task"]["name"], "Statistics");
        assert!(lines.iter().any(|line| line["error"] == "unknown command: bogus"));
        assert!(lines.iter().any(|line| line["event"] == "phaseChanged" && line["to"] == "running"));
        let today = lines
            .iter()
            .find(|line| !line["today"].is_null())
            .expect("today response");
        assert_eq!(today["today"]["date"], "2026-02-16");
        // Commands after exit are not executed.
        assert_eq!(
            lines
                .iter()
                .filter(|line| line["command"] == "Start(60)")
                .count(),
            0
        );
    }
}
