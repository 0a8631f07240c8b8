use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const TASK_NAME_MAX_CHARS: usize = 100;
pub const MIN_BREAK_MINUTES: u32 = 1;
pub const MAX_BREAK_MINUTES: u32 = 60;
/// Floating accumulation tolerance for `total_seconds == Σ sessions[i].seconds`.
pub const SECONDS_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Timer,
    Stopwatch,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Stopwatch => "stopwatch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "timer" => Some(Self::Timer),
            "stopwatch" => Some(Self::Stopwatch),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Timer => Self::Stopwatch,
            Self::Stopwatch => Self::Timer,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Live timer/stopwatch state.
///
/// `anchor_ms` is set exactly when `phase == Running`; elapsed time is always
/// `accumulated_seconds + (now - anchor_ms) / 1000`, never a tick count.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub mode: SessionMode,
    pub phase: SessionPhase,
    pub initial_duration_seconds: u64,
    pub anchor_ms: Option<i64>,
    pub accumulated_seconds: f64,
    pub active_task_id: Option<String>,
    /// First anchor of the session; the ledger start for completion and reset.
    pub session_start_ms: Option<i64>,
}

impl SessionState {
    pub fn idle(mode: SessionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Seconds of the current open interval, clamped so skewed anchors never go negative.
    pub fn open_interval_seconds(&self, now_ms: i64) -> f64 {
        match (self.phase, self.anchor_ms) {
            (SessionPhase::Running, Some(anchor)) => (now_ms - anchor).max(0) as f64 / 1000.0,
            _ => 0.0,
        }
    }

    pub fn elapsed_seconds(&self, now_ms: i64) -> f64 {
        self.accumulated_seconds.max(0.0) + self.open_interval_seconds(now_ms)
    }

    pub fn remaining_seconds(&self, now_ms: i64) -> f64 {
        match self.mode {
            SessionMode::Timer => {
                (self.initial_duration_seconds as f64 - self.elapsed_seconds(now_ms)).max(0.0)
            }
            SessionMode::Stopwatch => 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.phase, self.anchor_ms) {
            (SessionPhase::Running, None) => {
                return Err("session.anchor_ms is required while running".to_string());
            }
            (SessionPhase::Idle | SessionPhase::Paused | SessionPhase::Completed, Some(_)) => {
                return Err("session.anchor_ms must be empty unless running".to_string());
            }
            _ => {}
        }
        if self.accumulated_seconds < 0.0 || !self.accumulated_seconds.is_finite() {
            return Err("session.accumulated_seconds must be >= 0".to_string());
        }
        Ok(())
    }
}

/// Active break nested inside a running timer session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakState {
    pub break_ordinal: u32,
    pub started_at_ms: i64,
    pub planned_end_at_ms: i64,
    pub study_seconds_before_break: f64,
}

impl BreakState {
    pub fn remaining_seconds(&self, now_ms: i64) -> f64 {
        (self.planned_end_at_ms - now_ms).max(0) as f64 / 1000.0
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.break_ordinal == 0 {
            return Err("break.break_ordinal must be >= 1".to_string());
        }
        if self.planned_end_at_ms <= self.started_at_ms {
            return Err("break.planned_end_at_ms must be after break.started_at_ms".to_string());
        }
        Ok(())
    }
}

/// How a break came to an end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    /// Countdown reached zero.
    Natural,
    /// User ended the break before the countdown expired.
    Manual,
    /// User quit the whole session during the break.
    Quit,
    /// Break expired while the process was not running.
    Recovered,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakRecord {
    pub break_number: u32,
    pub start_time_iso: String,
    pub end_time_iso: String,
    pub duration_seconds: f64,
    pub study_seconds_before_break: f64,
    pub break_type: BreakType,
}

impl BreakRecord {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.start_time_iso)
            .ok()
            .map(|value| value.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub seconds: f64,
    pub started_at_iso: String,
    pub task: Option<TaskRef>,
    pub breaks: Option<Vec<BreakRecord>>,
}

/// Append-only per-date ledger record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudyDayRecord {
    pub date: String,
    pub total_seconds: f64,
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

impl StudyDayRecord {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date: date.format("%Y-%m-%d").to_string(),
            total_seconds: 0.0,
            sessions: Vec::new(),
        }
    }

    pub fn append(&mut self, entry: SessionEntry) {
        self.total_seconds += entry.seconds;
        self.sessions.push(entry);
    }

    pub fn sessions_sum(&self) -> f64 {
        self.sessions.iter().map(|entry| entry.seconds).sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_date(&self.date, "day.date")?;
        if self.total_seconds < 0.0 {
            return Err("day.total_seconds must be >= 0".to_string());
        }
        if (self.total_seconds - self.sessions_sum()).abs() > SECONDS_TOLERANCE {
            return Err("day.total_seconds must equal the sum of session seconds".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub color: String,
    pub created_at_iso: String,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_task_name(&self.name)?;
        validate_non_empty(&self.color, "task.color")?;
        Ok(())
    }

    pub fn to_ref(&self) -> TaskRef {
        TaskRef {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

pub fn validate_task_name(name: &str) -> Result<(), String> {
    validate_non_empty(name, "task.name")?;
    if name.trim().chars().count() > TASK_NAME_MAX_CHARS {
        return Err(format!(
            "task.name must be at most {TASK_NAME_MAX_CHARS} characters"
        ));
    }
    Ok(())
}

pub fn validate_break_minutes(minutes: u32) -> Result<(), String> {
    if !(MIN_BREAK_MINUTES..=MAX_BREAK_MINUTES).contains(&minutes) {
        return Err(format!(
            "break.minutes must be between {MIN_BREAK_MINUTES} and {MAX_BREAK_MINUTES}"
        ));
    }
    Ok(())
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}
