use crate::application::gateway::PersistenceGateway;
use crate::domain::day_split::{DaySegment, split_by_local_day};
use crate::domain::models::{BreakRecord, SessionEntry, StudyDayRecord, TaskRef};
use crate::infrastructure::clock::LocalZone;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::events::{ClockEvent, EventSink};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const LEDGER_KEY_PREFIX: &str = "ledger.";
const MAX_SUMMARY_DAYS: i64 = 366;

pub fn ledger_key(date: NaiveDate) -> String {
    format!("{LEDGER_KEY_PREFIX}{}", date.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayTotal {
    pub date: String,
    pub total_seconds: f64,
    pub session_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskTotal {
    pub task_id: Option<String>,
    pub name: Option<String>,
    pub color: Option<String>,
    pub seconds: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub start_date: String,
    pub end_date: String,
    pub total_seconds: f64,
    pub session_count: usize,
    pub days: Vec<DayTotal>,
    pub by_task: Vec<TaskTotal>,
}

/// Append-only writer and reader of per-date study records.
#[derive(Clone)]
pub struct StudyLedger {
    gateway: Arc<PersistenceGateway>,
    zone: LocalZone,
    events: Arc<dyn EventSink>,
}

impl StudyLedger {
    pub fn new(gateway: Arc<PersistenceGateway>, zone: LocalZone, events: Arc<dyn EventSink>) -> Self {
        Self {
            gateway,
            zone,
            events,
        }
    }

    pub fn zone(&self) -> LocalZone {
        self.zone
    }

    /// Appends `duration_seconds` starting at `session_start_ms`, split at local midnight.
    ///
    /// Each break record goes to the segment containing its start; breaks outside the
    /// logged span attach to the nearest end. Every segment is attempted even when an
    /// earlier write fails; the first failure is returned.
    pub fn log_duration(
        &self,
        duration_seconds: f64,
        session_start_ms: i64,
        task: Option<TaskRef>,
        breaks: Option<Vec<BreakRecord>>,
    ) -> Result<Vec<DaySegment>, InfraError> {
        let segments = split_by_local_day(session_start_ms, duration_seconds, &self.zone);
        if segments.is_empty() {
            return Ok(segments);
        }

        let mut breaks_by_segment = assign_breaks(&segments, breaks.unwrap_or_default());
        let mut first_error = None;

        for (index, segment) in segments.iter().enumerate() {
            let segment_breaks = breaks_by_segment
                .remove(&index)
                .filter(|records| !records.is_empty());
            let entry = SessionEntry {
                seconds: segment.seconds,
                started_at_iso: self.zone.to_iso(segment.start_ms),
                task: task.clone(),
                breaks: segment_breaks.clone(),
            };

            match self.append_entry(segment.date, entry) {
                Ok(()) => {
                    log::info!(
                        "logged {:.1}s on {} (task={})",
                        segment.seconds,
                        segment.date,
                        task.as_ref().map(|task| task.id.as_str()).unwrap_or("none")
                    );
                    self.events.emit(ClockEvent::DayLogged {
                        date: segment.date.format("%Y-%m-%d").to_string(),
                        seconds_added: segment.seconds,
                        task: task.clone(),
                        breaks: segment_breaks,
                    });
                }
                Err(error) => {
                    log::error!("ledger append for {} failed: {error}", segment.date);
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(segments),
        }
    }

    fn append_entry(&self, date: NaiveDate, entry: SessionEntry) -> Result<(), InfraError> {
        let key = ledger_key(date);
        // A malformed stored record is an error, never silently replaced.
        let mut record = match self.gateway.get_local(&key) {
            Some(value) => serde_json::from_value::<StudyDayRecord>(value)?,
            None => StudyDayRecord::empty(date),
        };
        record.append(entry);
        self.gateway.put_typed(&key, &record)
    }

    pub fn day(&self, date: NaiveDate) -> StudyDayRecord {
        self.gateway
            .get_local_typed::<StudyDayRecord>(&ledger_key(date))
            .unwrap_or_else(|| StudyDayRecord::empty(date))
    }

    /// Reads a day through the gateway so another device's writes become visible.
    pub async fn fetch_day(&self, date: NaiveDate) -> StudyDayRecord {
        let value = self
            .gateway
            .get(&ledger_key(date), serde_json::Value::Null)
            .await;
        serde_json::from_value(value).unwrap_or_else(|_| StudyDayRecord::empty(date))
    }

    pub fn summary(&self, start: NaiveDate, end: NaiveDate) -> Result<LedgerSummary, InfraError> {
        if start > end {
            return Err(InfraError::InvalidConfig(
                "summary start date must not be after end date".to_string(),
            ));
        }
        if (end - start).num_days() >= MAX_SUMMARY_DAYS {
            return Err(InfraError::InvalidConfig(format!(
                "summary range must be shorter than {MAX_SUMMARY_DAYS} days"
            )));
        }

        let mut days = Vec::new();
        let mut by_task: BTreeMap<Option<String>, TaskTotal> = BTreeMap::new();
        let mut total_seconds = 0.0;
        let mut session_count = 0;

        for date in start.iter_days().take_while(|date| *date <= end) {
            let record = self.day(date);
            for entry in &record.sessions {
                let task_id = entry.task.as_ref().map(|task| task.id.clone());
                let bucket = by_task.entry(task_id.clone()).or_insert_with(|| TaskTotal {
                    task_id,
                    name: None,
                    color: None,
                    seconds: 0.0,
                });
                // Latest snapshot wins so renamed tasks show their current name.
                if let Some(task) = entry.task.as_ref() {
                    bucket.name = Some(task.name.clone());
                    bucket.color = Some(task.color.clone());
                }
                bucket.seconds += entry.seconds;
            }
            total_seconds += record.total_seconds;
            session_count += record.sessions.len();
            days.push(DayTotal {
                date: record.date.clone(),
                total_seconds: record.total_seconds,
                session_count: record.sessions.len(),
            });
        }

        let mut by_task: Vec<TaskTotal> = by_task.into_values().collect();
        by_task.sort_by(|left, right| right.seconds.total_cmp(&left.seconds));

        Ok(LedgerSummary {
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: end.format("%Y-%m-%d").to_string(),
            total_seconds,
            session_count,
            days,
            by_task,
        })
    }
}

fn assign_breaks(
    segments: &[DaySegment],
    breaks: Vec<BreakRecord>,
) -> BTreeMap<usize, Vec<BreakRecord>> {
    let mut assigned: BTreeMap<usize, Vec<BreakRecord>> = BTreeMap::new();
    let last = segments.len().saturating_sub(1);
    for record in breaks {
        let index = match record.started_at().map(|started| started.timestamp_millis()) {
            Some(started_ms) => segments
                .iter()
                .position(|segment| segment.contains_ms(started_ms))
                .unwrap_or_else(|| {
                    if segments.first().is_some_and(|first| started_ms < first.start_ms) {
                        0
                    } else {
                        last
                    }
                }),
            None => last,
        };
        assigned.entry(index).or_default().push(record);
    }
    assigned
}
