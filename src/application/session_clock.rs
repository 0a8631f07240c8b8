//! Timer/stopwatch state machine.
//!
//! Elapsed time is always derived from the persisted anchor (`accumulated + now - anchor`),
//! so suspension, sleep and reloads never distort it. Commands issued in the wrong phase
//! are ignored, and persistence failures are logged without blocking a transition.

use crate::application::breaks::{BreakController, BreakRejection};
use crate::application::gateway::PersistenceGateway;
use crate::application::ledger::StudyLedger;
use crate::application::tasks::TaskRegistry;
use crate::domain::models::{BreakRecord, BreakState, BreakType, SessionMode, SessionPhase, SessionState};
use crate::infrastructure::clock::{Clock, LocalZone};
use crate::infrastructure::command_log::CommandLog;
use crate::infrastructure::events::{ClockEvent, DisplayTime, EventSink};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

pub const TIMER_PHASE_KEY: &str = "timer.phase";
pub const TIMER_MODE_KEY: &str = "timer.mode";
pub const TIMER_ANCHOR_KEY: &str = "timer.anchorMs";
pub const TIMER_ACCUMULATED_KEY: &str = "timer.accumulatedSeconds";
pub const TIMER_INITIAL_KEY: &str = "timer.initialDurationSeconds";
pub const TIMER_LAST_ACTIVE_DATE_KEY: &str = "timer.lastActiveDate";
pub const TIMER_SESSION_START_KEY: &str = "timer.sessionStartMs";
pub const TIMER_ACTIVE_TASK_KEY: &str = "timer.activeTaskId";

/// Shared collaborators injected into the clock, recovery and host.
#[derive(Clone)]
pub struct SessionServices {
    pub gateway: Arc<PersistenceGateway>,
    pub clock: Arc<dyn Clock>,
    pub zone: LocalZone,
    pub events: Arc<dyn EventSink>,
    pub tasks: Arc<TaskRegistry>,
    pub command_log: Arc<CommandLog>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    Ignored(&'static str),
}

impl CommandOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClockSnapshot {
    pub mode: SessionMode,
    pub phase: SessionPhase,
    pub initial_duration_seconds: u64,
    pub elapsed_seconds: f64,
    pub remaining_seconds: f64,
    pub display: DisplayTime,
    pub active_task_id: Option<String>,
    pub on_break: bool,
    pub break_remaining_seconds: Option<u64>,
    pub breaks_taken: usize,
}

pub struct SessionClock {
    state: SessionState,
    breaks: BreakController,
    ledger: StudyLedger,
    services: SessionServices,
}

impl SessionClock {
    pub fn new(services: SessionServices) -> Self {
        Self {
            state: SessionState::default(),
            breaks: BreakController::new(services.gateway.clone(), services.zone),
            ledger: StudyLedger::new(services.gateway.clone(), services.zone, services.events.clone()),
            services,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn ledger(&self) -> &StudyLedger {
        &self.ledger
    }

    pub fn breaks(&self) -> &BreakController {
        &self.breaks
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn is_on_break(&self) -> bool {
        self.breaks.is_active()
    }

    fn now_ms(&self) -> i64 {
        self.services.clock.now_ms()
    }

    pub fn start(&mut self, duration_seconds: u64) -> CommandOutcome {
        let outcome = self.apply_start(duration_seconds);
        self.record("start", outcome, || format!("duration={duration_seconds}s"));
        outcome
    }

    fn apply_start(&mut self, duration_seconds: u64) -> CommandOutcome {
        if self.state.phase != SessionPhase::Idle {
            return CommandOutcome::Ignored("start requires an idle session");
        }
        if self.state.mode == SessionMode::Timer && duration_seconds == 0 {
            return CommandOutcome::Ignored("timer duration must be positive");
        }

        let now = self.now_ms();
        let from = self.state.phase;
        self.state = SessionState {
            mode: self.state.mode,
            phase: SessionPhase::Running,
            initial_duration_seconds: match self.state.mode {
                SessionMode::Timer => duration_seconds,
                SessionMode::Stopwatch => 0,
            },
            anchor_ms: Some(now),
            accumulated_seconds: 0.0,
            active_task_id: self.state.active_task_id.take(),
            session_start_ms: Some(now),
        };
        self.breaks.clear();
        self.persist();
        self.emit_phase(from);
        self.emit_tick(now);
        CommandOutcome::Applied
    }

    pub fn pause(&mut self) -> CommandOutcome {
        let now = self.now_ms();
        if self.timer_ran_out(now) {
            let outcome = self.complete();
            self.record("pause", outcome, || "timer had run out; completed instead".to_string());
            return outcome;
        }
        let outcome = if self.state.phase == SessionPhase::Running {
            self.bank_elapsed(now);
            self.persist();
            self.emit_phase(SessionPhase::Running);
            CommandOutcome::Applied
        } else {
            CommandOutcome::Ignored("pause requires a running session")
        };
        self.record("pause", outcome, String::new);
        outcome
    }

    pub fn resume(&mut self) -> CommandOutcome {
        let outcome = self.apply_resume();
        self.record("resume", outcome, String::new);
        outcome
    }

    fn apply_resume(&mut self) -> CommandOutcome {
        if self.state.phase != SessionPhase::Paused {
            return CommandOutcome::Ignored("resume requires a paused session");
        }
        if self.breaks.is_active() {
            return CommandOutcome::Ignored("end the break to resume");
        }
        let now = self.now_ms();
        if self.timer_ran_out(now) {
            return self.complete();
        }
        self.reanchor(now);
        self.persist();
        self.emit_phase(SessionPhase::Paused);
        CommandOutcome::Applied
    }

    /// Logs any elapsed study time, then returns to idle. Valid in every phase.
    ///
    /// A timer that already ran out is completed first, so only its planned duration is logged.
    pub fn reset(&mut self) -> CommandOutcome {
        let now = self.now_ms();
        if self.timer_ran_out(now) {
            self.complete();
        }
        if self.breaks.is_active() {
            self.breaks.finish(now, BreakType::Quit);
        }
        let logged = self.flush_and_clear(now);
        self.record("reset", CommandOutcome::Applied, || format!("logged={logged:.1}s"));
        CommandOutcome::Applied
    }

    fn flush_and_clear(&mut self, now: i64) -> f64 {
        let from = self.state.phase;
        let elapsed = match from {
            SessionPhase::Running | SessionPhase::Paused => self.state.elapsed_seconds(now),
            SessionPhase::Idle | SessionPhase::Completed => 0.0,
        };

        if elapsed > 0.0 {
            let start_ms = self
                .state
                .session_start_ms
                .unwrap_or_else(|| now - (elapsed * 1000.0).round() as i64);
            self.log_session(elapsed, start_ms);
        }

        self.state = SessionState {
            active_task_id: self.state.active_task_id.take(),
            ..SessionState::idle(self.state.mode)
        };
        self.persist();
        self.breaks.clear();
        self.emit_phase(from);
        self.emit_tick(now);
        elapsed
    }

    /// Advances the display. A timer with nothing left completes in the same call.
    pub fn tick(&mut self) -> CommandOutcome {
        if self.state.phase != SessionPhase::Running {
            return CommandOutcome::Ignored("tick requires a running session");
        }
        let now = self.now_ms();
        if self.timer_ran_out(now) {
            return self.complete();
        }
        self.emit_tick(now);
        CommandOutcome::Applied
    }

    /// Logs the full planned duration against the original session start.
    pub fn complete(&mut self) -> CommandOutcome {
        let outcome = self.apply_complete();
        self.record("complete", outcome, || {
            format!("duration={}s", self.state.initial_duration_seconds)
        });
        outcome
    }

    fn apply_complete(&mut self) -> CommandOutcome {
        if self.state.mode != SessionMode::Timer
            || !matches!(self.state.phase, SessionPhase::Running | SessionPhase::Paused)
        {
            return CommandOutcome::Ignored("complete requires an active timer");
        }
        let now = self.now_ms();
        if self.breaks.is_active() {
            self.breaks.finish(now, BreakType::Quit);
        }

        let from = self.state.phase;
        let initial = self.state.initial_duration_seconds;
        let start_ms = self
            .state
            .session_start_ms
            .or(self.state.anchor_ms)
            .unwrap_or(now - initial as i64 * 1000);
        self.log_session(initial as f64, start_ms);

        self.state = SessionState {
            mode: SessionMode::Timer,
            phase: SessionPhase::Completed,
            initial_duration_seconds: initial,
            anchor_ms: None,
            accumulated_seconds: 0.0,
            active_task_id: self.state.active_task_id.take(),
            session_start_ms: None,
        };
        self.persist();
        self.breaks.clear();
        self.emit_phase(from);
        self.services.events.emit(ClockEvent::Tick(DisplayTime::from_seconds(0)));
        CommandOutcome::Applied
    }

    pub fn toggle_mode(&mut self) -> CommandOutcome {
        let outcome = if matches!(self.state.phase, SessionPhase::Idle | SessionPhase::Completed) {
            let from = self.state.phase;
            let mode = self.state.mode.toggled();
            self.state = SessionState {
                active_task_id: self.state.active_task_id.take(),
                ..SessionState::idle(mode)
            };
            self.persist();
            self.emit_phase(from);
            CommandOutcome::Applied
        } else {
            CommandOutcome::Ignored("mode can only change while idle or completed")
        };
        self.record("toggle_mode", outcome, || format!("mode={}", self.state.mode.as_str()));
        outcome
    }

    /// Selects the task future log entries are attributed to. Valid in any phase.
    pub fn set_active_task(&mut self, task_id: Option<&str>) -> CommandOutcome {
        let task_id = task_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned);
        if let Some(id) = task_id.as_deref() {
            if self.services.tasks.get(id).is_none() {
                log::warn!("active task {id} is not in the registry; sessions will log without a task");
            }
        }
        self.state.active_task_id = task_id;
        self.persist();
        self.record("set_active_task", CommandOutcome::Applied, || {
            format!("task={}", self.state.active_task_id.as_deref().unwrap_or("none"))
        });
        CommandOutcome::Applied
    }

    pub fn start_break(&mut self, minutes: u32) -> CommandOutcome {
        let outcome = self.apply_start_break(minutes);
        self.record("start_break", outcome, || format!("minutes={minutes}"));
        outcome
    }

    fn apply_start_break(&mut self, minutes: u32) -> CommandOutcome {
        if self.state.mode != SessionMode::Timer || self.state.phase != SessionPhase::Running {
            return CommandOutcome::Ignored("breaks require a running timer");
        }
        let now = self.now_ms();
        if self.timer_ran_out(now) {
            self.complete();
            return CommandOutcome::Ignored("timer had run out; session completed");
        }
        let study_seconds = self.state.elapsed_seconds(now);
        match self.breaks.begin(minutes, now, study_seconds) {
            Ok(state) => {
                self.bank_elapsed(now);
                self.persist();
                self.emit_phase(SessionPhase::Running);
                self.emit_break_tick(&state, now);
                CommandOutcome::Applied
            }
            Err(BreakRejection::AlreadyOnBreak) => CommandOutcome::Ignored("already on a break"),
            Err(BreakRejection::InvalidMinutes(_)) => {
                CommandOutcome::Ignored("break minutes must be between 1 and 60")
            }
        }
    }

    /// Ends the break early; the study clock resumes immediately.
    pub fn end_break(&mut self) -> CommandOutcome {
        let now = self.now_ms();
        let outcome = self.finish_break(now, now, BreakType::Manual);
        self.record("end_break", outcome, String::new);
        outcome
    }

    /// Closes the break and logs the session once, with every break record attached.
    pub fn quit_break(&mut self) -> CommandOutcome {
        let outcome = if self.breaks.is_active() {
            let now = self.now_ms();
            self.breaks.finish(now, BreakType::Quit);
            self.flush_and_clear(now);
            CommandOutcome::Applied
        } else {
            CommandOutcome::Ignored("no active break")
        };
        self.record("quit_break", outcome, String::new);
        outcome
    }

    /// Countdown step; ends the break naturally once its planned end has passed.
    pub fn break_tick(&mut self) -> CommandOutcome {
        let now = self.now_ms();
        let Some(state) = self.breaks.active().cloned() else {
            return CommandOutcome::Ignored("no active break");
        };
        if now >= state.planned_end_at_ms {
            self.services
                .events
                .emit(ClockEvent::BreakTick { remaining_seconds: 0 });
            let outcome = self.finish_break(state.planned_end_at_ms, now, BreakType::Natural);
            self.record("end_break", outcome, || "natural expiry".to_string());
            return outcome;
        }
        self.emit_break_tick(&state, now);
        CommandOutcome::Applied
    }

    fn finish_break(&mut self, break_end_ms: i64, resume_at_ms: i64, break_type: BreakType) -> CommandOutcome {
        if self.breaks.finish(break_end_ms, break_type).is_none() {
            return CommandOutcome::Ignored("no active break");
        }
        if self.state.phase == SessionPhase::Paused {
            self.reanchor(resume_at_ms);
            self.persist();
            self.emit_phase(SessionPhase::Paused);
            self.emit_tick(resume_at_ms);
        }
        CommandOutcome::Applied
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        let now = self.now_ms();
        let elapsed = self.state.elapsed_seconds(now);
        let remaining = self.state.remaining_seconds(now);
        ClockSnapshot {
            mode: self.state.mode,
            phase: self.state.phase,
            initial_duration_seconds: self.state.initial_duration_seconds,
            elapsed_seconds: elapsed,
            remaining_seconds: remaining,
            display: self.display_time(now),
            active_task_id: self.state.active_task_id.clone(),
            on_break: self.breaks.is_active(),
            break_remaining_seconds: self
                .breaks
                .remaining_seconds(now)
                .map(|seconds| seconds.ceil() as u64),
            breaks_taken: self.breaks.records().len(),
        }
    }

    /// Installs recovered state without persisting or emitting.
    pub(crate) fn restore(
        &mut self,
        state: SessionState,
        active_break: Option<BreakState>,
        break_records: Vec<BreakRecord>,
    ) {
        self.state = state;
        self.breaks.restore(active_break, break_records);
    }

    /// Finishes a break that expired while nothing was running and resumes the clock.
    pub(crate) fn finish_expired_break(&mut self, now: i64) -> CommandOutcome {
        let Some(planned_end) = self.breaks.active().map(|state| state.planned_end_at_ms) else {
            return CommandOutcome::Ignored("no active break");
        };
        self.finish_break(planned_end, now, BreakType::Recovered)
    }

    /// Drops the active break and the session's break records, persisted copies included.
    pub(crate) fn discard_breaks(&mut self) {
        self.breaks.clear();
    }

    pub(crate) fn persist_state(&self) {
        self.persist();
    }

    /// Running or paused timer with none of its planned duration left.
    fn timer_ran_out(&self, now: i64) -> bool {
        self.state.mode == SessionMode::Timer
            && matches!(self.state.phase, SessionPhase::Running | SessionPhase::Paused)
            && self.state.remaining_seconds(now) <= 0.0
    }

    fn bank_elapsed(&mut self, now: i64) {
        self.state.accumulated_seconds = self.state.elapsed_seconds(now);
        self.state.anchor_ms = None;
        self.state.phase = SessionPhase::Paused;
    }

    fn reanchor(&mut self, now: i64) {
        self.state.anchor_ms = Some(now);
        self.state.phase = SessionPhase::Running;
    }

    fn log_session(&mut self, seconds: f64, start_ms: i64) {
        let task = self
            .services
            .tasks
            .resolve(self.state.active_task_id.as_deref());
        let breaks = self.breaks.take_records();
        if let Err(error) = self.ledger.log_duration(seconds, start_ms, task, breaks) {
            self.services
                .command_log
                .error("ledger", &format!("failed to log {seconds:.1}s: {error}"));
        }
    }

    fn persist(&self) {
        let state = &self.state;
        let today = self.services.zone.date_of(self.now_ms());
        let entries: [(&str, Value); 8] = [
            (TIMER_PHASE_KEY, json!(state.phase.as_str())),
            (TIMER_MODE_KEY, json!(state.mode.as_str())),
            (TIMER_ANCHOR_KEY, json!(state.anchor_ms)),
            (TIMER_ACCUMULATED_KEY, json!(state.accumulated_seconds)),
            (TIMER_INITIAL_KEY, json!(state.initial_duration_seconds)),
            (TIMER_SESSION_START_KEY, json!(state.session_start_ms)),
            (TIMER_ACTIVE_TASK_KEY, json!(state.active_task_id)),
            (
                TIMER_LAST_ACTIVE_DATE_KEY,
                json!(today.format("%Y-%m-%d").to_string()),
            ),
        ];
        for (key, value) in entries {
            if let Err(error) = self.services.gateway.put(key, value) {
                log::warn!("failed to persist {key}: {error}");
            }
        }
    }

    fn display_time(&self, now: i64) -> DisplayTime {
        let seconds = match self.state.mode {
            SessionMode::Timer => self.state.remaining_seconds(now).ceil(),
            SessionMode::Stopwatch => self.state.elapsed_seconds(now).floor(),
        };
        DisplayTime::from_seconds(seconds.max(0.0) as u64)
    }

    fn emit_tick(&self, now: i64) {
        self.services
            .events
            .emit(ClockEvent::Tick(self.display_time(now)));
    }

    fn emit_break_tick(&self, state: &BreakState, now: i64) {
        self.services.events.emit(ClockEvent::BreakTick {
            remaining_seconds: state.remaining_seconds(now).ceil() as u64,
        });
    }

    fn emit_phase(&self, from: SessionPhase) {
        if from != self.state.phase {
            self.services.events.emit(ClockEvent::PhaseChanged {
                from,
                to: self.state.phase,
            });
        }
    }

    fn record(&self, command: &str, outcome: CommandOutcome, detail: impl FnOnce() -> String) {
        match outcome {
            CommandOutcome::Applied => {
                let detail = detail();
                let message = if detail.is_empty() {
                    format!("applied; phase={}", self.state.phase.as_str())
                } else {
                    format!("applied; phase={}; {detail}", self.state.phase.as_str())
                };
                self.services.command_log.info(command, &message);
            }
            CommandOutcome::Ignored(reason) => {
                self.services
                    .command_log
                    .warn(command, &format!("ignored: {reason}"));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::events::RecordingEventSink;
    use crate::infrastructure::local_cache::InMemoryLocalCache;
    use chrono::{DateTime, NaiveDate};
    use proptest::prelude::*;

    pub(crate) struct Fixture {
        pub clock: ManualClock,
        pub events: Arc<RecordingEventSink>,
        pub services: SessionServices,
    }

    pub(crate) fn ms(value: &str) -> i64 {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .timestamp_millis()
    }

    pub(crate) fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    impl Fixture {
        pub(crate) fn at(instant: &str) -> Self {
            Self::with_gateway(
                instant,
                Arc::new(PersistenceGateway::local_only(
                    "default",
                    Arc::new(InMemoryLocalCache::default()),
                )),
            )
        }

        pub(crate) fn with_gateway(instant: &str, gateway: Arc<PersistenceGateway>) -> Self {
            let clock = ManualClock::new(ms(instant));
            let events = Arc::new(RecordingEventSink::default());
            let zone = LocalZone::parse(Some("UTC")).expect("utc");
            let tasks = Arc::new(TaskRegistry::new(gateway.clone(), Arc::new(clock.clone()), zone));
            let services = SessionServices {
                gateway,
                clock: Arc::new(clock.clone()),
                zone,
                events: events.clone(),
                tasks,
                command_log: Arc::new(CommandLog::disabled()),
            };
            Self {
                clock,
                events,
                services,
            }
        }

        pub(crate) fn session(&self) -> SessionClock {
            SessionClock::new(self.services.clone())
        }

        pub(crate) fn day(&self, value: &str) -> crate::domain::models::StudyDayRecord {
            StudyLedger::new(
                self.services.gateway.clone(),
                self.services.zone,
                self.events.clone(),
            )
            .day(date(value))
        }
    }

    #[test]
    fn timer_runs_pauses_and_resumes_from_timestamps() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();

        assert!(session.start(1500).is_applied());
        assert_eq!(session.phase(), SessionPhase::Running);
        assert!(!session.start(1500).is_applied());

        fixture.clock.advance_seconds(100);
        assert!(session.pause().is_applied());
        assert_eq!(session.state().accumulated_seconds, 100.0);
        assert_eq!(session.state().anchor_ms, None);

        // Paused time is not counted.
        fixture.clock.advance_seconds(3_600);
        assert!(session.resume().is_applied());
        fixture.clock.advance_seconds(50);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.elapsed_seconds, 150.0);
        assert_eq!(snapshot.remaining_seconds, 1350.0);
        assert_eq!(snapshot.display.minutes, 22);
        assert_eq!(snapshot.display.seconds, 30);
    }

    #[test]
    fn wrong_phase_commands_are_noops() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();

        assert!(!session.pause().is_applied());
        assert!(!session.resume().is_applied());
        assert!(!session.tick().is_applied());
        assert!(!session.end_break().is_applied());
        assert!(!session.quit_break().is_applied());
        assert!(!session.start(0).is_applied());
        assert!(!session.start_break(5).is_applied());
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(fixture.events.events().is_empty());
    }

    #[test]
    fn tick_completes_timer_and_logs_full_duration() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(10);

        fixture.clock.advance_seconds(5);
        assert!(session.tick().is_applied());
        assert_eq!(session.phase(), SessionPhase::Running);

        fixture.clock.advance_ms(5_050);
        assert!(session.tick().is_applied());
        assert_eq!(session.phase(), SessionPhase::Completed);

        let day = fixture.day("2026-02-16");
        assert_eq!(day.sessions.len(), 1);
        assert_eq!(day.sessions[0].seconds, 10.0);
        assert_eq!(day.sessions[0].started_at_iso, "2026-02-16T09:00:00+00:00");
        assert!(!session.tick().is_applied());
    }

    #[test]
    fn reset_flushes_elapsed_time_then_clears() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(1500);
        fixture.clock.advance_seconds(300);
        session.pause();
        fixture.clock.advance_seconds(60);

        assert!(session.reset().is_applied());
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.state().accumulated_seconds, 0.0);
        assert_eq!(fixture.day("2026-02-16").total_seconds, 300.0);

        // Idle reset logs nothing more.
        session.reset();
        assert_eq!(fixture.day("2026-02-16").sessions.len(), 1);
        assert_eq!(
            fixture.services.gateway.get_local(TIMER_PHASE_KEY),
            Some(json!("idle"))
        );
    }

    #[test]
    fn stopwatch_ignores_duration_and_logs_elapsed_on_reset() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        assert!(session.toggle_mode().is_applied());
        assert_eq!(session.state().mode, SessionMode::Stopwatch);

        assert!(session.start(0).is_applied());
        fixture.clock.advance_seconds(4_000);
        assert!(session.tick().is_applied());
        assert_eq!(session.phase(), SessionPhase::Running);
        assert!(!session.start_break(5).is_applied());
        assert!(!session.toggle_mode().is_applied());

        session.reset();
        assert_eq!(fixture.day("2026-02-16").total_seconds, 4_000.0);
    }

    #[test]
    fn session_is_attributed_to_active_task() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let task = fixture
            .services
            .tasks
            .create("Organic chemistry", Some("#10b981"))
            .expect("create task");
        let mut session = fixture.session();
        session.set_active_task(Some(&task.id));
        session.start(60);
        fixture.clock.advance_seconds(61);
        session.tick();

        let day = fixture.day("2026-02-16");
        assert_eq!(
            day.sessions[0].task.as_ref().map(|task| task.name.as_str()),
            Some("Organic chemistry")
        );

        // Unknown ids fail soft to no task.
        session.reset();
        session.set_active_task(Some("tsk-missing"));
        session.start(60);
        fixture.clock.advance_seconds(61);
        session.tick();
        assert!(fixture.day("2026-02-16").sessions[1].task.is_none());
    }

    #[test]
    fn break_records_actual_duration_not_planned() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(1500);
        fixture.clock.advance_seconds(600);

        assert!(session.start_break(5).is_applied());
        assert_eq!(session.phase(), SessionPhase::Paused);
        assert!(!session.resume().is_applied());
        assert!(!session.start_break(5).is_applied());

        fixture.clock.advance_seconds(2);
        assert!(session.end_break().is_applied());
        assert_eq!(session.phase(), SessionPhase::Running);

        let record = &session.breaks().records()[0];
        assert_eq!(record.duration_seconds, 2.0);
        assert_eq!(record.study_seconds_before_break, 600.0);
        assert_eq!(record.break_type, BreakType::Manual);

        // Break time is not study time.
        fixture.clock.advance_seconds(100);
        assert_eq!(session.snapshot().elapsed_seconds, 700.0);
    }

    #[test]
    fn break_countdown_expires_naturally() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(1500);
        fixture.clock.advance_seconds(60);
        session.start_break(1);

        fixture.clock.advance_seconds(30);
        assert!(session.break_tick().is_applied());
        assert!(fixture.events.events().contains(&ClockEvent::BreakTick {
            remaining_seconds: 30
        }));

        fixture.clock.advance_seconds(31);
        assert!(session.break_tick().is_applied());
        assert!(!session.is_on_break());
        assert_eq!(session.phase(), SessionPhase::Running);
        let record = &session.breaks().records()[0];
        assert_eq!(record.break_type, BreakType::Natural);
        assert_eq!(record.duration_seconds, 60.0);
    }

    #[test]
    fn quit_during_break_logs_session_exactly_once() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(1500);
        fixture.clock.advance_seconds(600);
        session.start_break(5);
        fixture.clock.advance_seconds(90);

        assert!(session.quit_break().is_applied());
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(!session.is_on_break());

        let day = fixture.day("2026-02-16");
        assert_eq!(day.sessions.len(), 1);
        assert_eq!(day.total_seconds, 600.0);
        let breaks = day.sessions[0].breaks.as_ref().expect("break records attached");
        assert_eq!(breaks.len(), 1);
        assert_eq!(breaks[0].break_type, BreakType::Quit);
        assert_eq!(breaks[0].duration_seconds, 90.0);

        session.reset();
        assert_eq!(fixture.day("2026-02-16").sessions.len(), 1);
        assert_eq!(fixture.events.day_logged().len(), 1);
        assert_eq!(
            fixture.services.gateway.get_local(crate::application::breaks::BREAK_ACTIVE_KEY),
            None
        );
    }

    #[test]
    fn clock_skew_never_produces_negative_elapsed() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(1500);
        fixture.clock.advance_seconds(-120);
        assert_eq!(session.snapshot().elapsed_seconds, 0.0);
        session.reset();
        assert!(fixture.day("2026-02-16").sessions.is_empty());
    }

    #[test]
    fn phase_changes_are_emitted() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(60);
        session.pause();
        let phases: Vec<_> = fixture
            .events
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ClockEvent::PhaseChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                (SessionPhase::Idle, SessionPhase::Running),
                (SessionPhase::Running, SessionPhase::Paused)
            ]
        );
    }

    #[test]
    fn overrun_pause_completes_with_planned_duration() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(10);
        fixture.clock.advance_seconds(30);

        assert!(session.pause().is_applied());
        assert_eq!(session.phase(), SessionPhase::Completed);
        assert!(!session.resume().is_applied());

        session.reset();
        let day = fixture.day("2026-02-16");
        assert_eq!(day.sessions.len(), 1);
        assert_eq!(day.total_seconds, 10.0);
    }

    #[test]
    fn overrun_reset_logs_planned_duration_and_lands_idle() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(10);
        fixture.clock.advance_seconds(30);

        assert!(session.reset().is_applied());
        assert_eq!(session.phase(), SessionPhase::Idle);
        let day = fixture.day("2026-02-16");
        assert_eq!(day.sessions.len(), 1);
        assert_eq!(day.total_seconds, 10.0);
    }

    #[test]
    fn overrun_break_request_completes_instead() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.start(10);
        fixture.clock.advance_seconds(30);

        assert!(!session.start_break(5).is_applied());
        assert!(!session.is_on_break());
        assert_eq!(session.phase(), SessionPhase::Completed);
        assert_eq!(fixture.day("2026-02-16").total_seconds, 10.0);
    }

    #[test]
    fn resuming_exhausted_paused_timer_completes_it() {
        let fixture = Fixture::at("2026-02-16T09:00:00Z");
        let mut session = fixture.session();
        session.restore(
            SessionState {
                mode: SessionMode::Timer,
                phase: SessionPhase::Paused,
                initial_duration_seconds: 10,
                anchor_ms: None,
                accumulated_seconds: 30.0,
                active_task_id: None,
                session_start_ms: Some(ms("2026-02-16T08:59:00Z")),
            },
            None,
            Vec::new(),
        );

        assert!(session.resume().is_applied());
        assert_eq!(session.phase(), SessionPhase::Completed);
        let day = fixture.day("2026-02-16");
        assert_eq!(day.total_seconds, 10.0);
        assert_eq!(day.sessions[0].started_at_iso, "2026-02-16T08:59:00+00:00");
    }

    #[test]
    fn session_across_midnight_splits_running_time_between_days() {
        let fixture = Fixture::at("2026-02-16T23:50:00Z");
        let mut session = fixture.session();
        session.start(7_200);

        fixture.clock.advance_seconds(300);
        session.pause();
        fixture.clock.advance_seconds(120);
        session.resume();
        // 23:57 -> 00:20 running.
        fixture.clock.set_ms(ms("2026-02-17T00:20:00Z"));
        assert!(session.reset().is_applied());

        let first = fixture.day("2026-02-16");
        let second = fixture.day("2026-02-17");
        assert_eq!(first.total_seconds + second.total_seconds, 300.0 + 1_380.0);
        // The split is taken from the session start, so the first day owns the 10 minutes to midnight.
        assert_eq!(first.total_seconds, 600.0);
        assert_eq!(second.total_seconds, 1_080.0);
        assert_eq!(second.sessions[0].started_at_iso, "2026-02-17T00:00:00+00:00");
    }

    #[derive(Debug, Clone)]
    enum Step {
        Advance(i64),
        Pause,
        Resume,
        Break(u32),
        EndBreak,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            (1i64..900).prop_map(Step::Advance),
            Just(Step::Pause),
            Just(Step::Resume),
            (1u32..=10).prop_map(Step::Break),
            Just(Step::EndBreak),
        ]
    }

    // Property: logged time equals the sum of running intervals
    proptest! {
        #[test]
        fn property4_logged_time_excludes_pauses_and_breaks(
            start_offset in 0i64..86_400,
            steps in proptest::collection::vec(step_strategy(), 1..40),
        ) {
            let fixture = Fixture::at("2026-02-16T00:00:00Z");
            fixture.clock.advance_seconds(start_offset);
            let mut session = fixture.session();
            session.start(1_000_000);

            let mut running_seconds = 0i64;
            for step in steps {
                match step {
                    Step::Advance(seconds) => {
                        if session.phase() == SessionPhase::Running {
                            running_seconds += seconds;
                        }
                        fixture.clock.advance_seconds(seconds);
                    }
                    Step::Pause => { session.pause(); }
                    Step::Resume => { session.resume(); }
                    Step::Break(minutes) => { session.start_break(minutes); }
                    Step::EndBreak => { session.end_break(); }
                }
            }
            session.reset();

            let logged: f64 = (16..=18)
                .map(|day| fixture.day(&format!("2026-02-{day}")).total_seconds)
                .sum();
            prop_assert!((logged - running_seconds as f64).abs() < 1e-6);
        }
    }
}
