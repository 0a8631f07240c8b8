use crate::application::gateway::PersistenceGateway;
use crate::domain::models::{BreakRecord, BreakState, BreakType, validate_break_minutes};
use crate::infrastructure::clock::LocalZone;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const BREAK_ACTIVE_KEY: &str = "breakState.active";
pub const BREAK_RECORDS_KEY: &str = "breakState.records";

/// Stored form of an active break.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedBreak {
    #[serde(flatten)]
    pub state: BreakState,
    pub break_end_at_ms: i64,
    pub was_paused_before_break: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakRejection {
    AlreadyOnBreak,
    InvalidMinutes(String),
}

/// Break sub-state of a running timer session plus the session's finished breaks.
pub struct BreakController {
    gateway: Arc<PersistenceGateway>,
    zone: LocalZone,
    active: Option<BreakState>,
    records: Vec<BreakRecord>,
}

impl BreakController {
    pub fn new(gateway: Arc<PersistenceGateway>, zone: LocalZone) -> Self {
        Self {
            gateway,
            zone,
            active: None,
            records: Vec::new(),
        }
    }

    pub fn active(&self) -> Option<&BreakState> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn records(&self) -> &[BreakRecord] {
        &self.records
    }

    pub fn remaining_seconds(&self, now_ms: i64) -> Option<f64> {
        self.active.as_ref().map(|state| state.remaining_seconds(now_ms))
    }

    pub fn begin(
        &mut self,
        minutes: u32,
        now_ms: i64,
        study_seconds_before_break: f64,
    ) -> Result<BreakState, BreakRejection> {
        if self.active.is_some() {
            return Err(BreakRejection::AlreadyOnBreak);
        }
        validate_break_minutes(minutes).map_err(BreakRejection::InvalidMinutes)?;

        let state = BreakState {
            break_ordinal: self.records.len() as u32 + 1,
            started_at_ms: now_ms,
            planned_end_at_ms: now_ms + i64::from(minutes) * 60_000,
            study_seconds_before_break,
        };
        self.active = Some(state.clone());
        self.persist_active();
        Ok(state)
    }

    /// Ends the active break at `end_ms` and appends its record to the session list.
    pub fn finish(&mut self, end_ms: i64, break_type: BreakType) -> Option<BreakRecord> {
        let state = self.active.take()?;
        let end_ms = end_ms.max(state.started_at_ms);
        let record = BreakRecord {
            break_number: state.break_ordinal,
            start_time_iso: self.zone.to_iso(state.started_at_ms),
            end_time_iso: self.zone.to_iso(end_ms),
            duration_seconds: (end_ms - state.started_at_ms) as f64 / 1000.0,
            study_seconds_before_break: state.study_seconds_before_break,
            break_type,
        };
        log::info!(
            "break #{} ended ({:?}) after {:.1}s",
            record.break_number,
            break_type,
            record.duration_seconds
        );
        self.records.push(record.clone());
        self.persist_records();
        self.persist_active();
        Some(record)
    }

    /// Hands the session's break records to the ledger and forgets them.
    pub fn take_records(&mut self) -> Option<Vec<BreakRecord>> {
        let records = std::mem::take(&mut self.records);
        (!records.is_empty()).then_some(records)
    }

    /// Drops every break key. Called after the session has been logged.
    pub fn clear(&mut self) {
        self.active = None;
        self.records.clear();
        for key in [BREAK_RECORDS_KEY, BREAK_ACTIVE_KEY] {
            if let Err(error) = self.gateway.clear(key) {
                log::warn!("failed to clear {key}: {error}");
            }
        }
    }

    pub fn load_persisted(&self) -> (Option<PersistedBreak>, Vec<BreakRecord>) {
        let active = self
            .gateway
            .get_local_typed::<PersistedBreak>(BREAK_ACTIVE_KEY)
            .filter(|persisted| match persisted.state.validate() {
                Ok(()) => true,
                Err(error) => {
                    log::warn!("discarding persisted break: {error}");
                    false
                }
            });
        let records = self
            .gateway
            .get_local_typed::<Vec<BreakRecord>>(BREAK_RECORDS_KEY)
            .unwrap_or_default();
        (active, records)
    }

    /// Reinstates state read by [`Self::load_persisted`] without rewriting it.
    pub fn restore(&mut self, active: Option<BreakState>, records: Vec<BreakRecord>) {
        self.active = active;
        self.records = records;
    }

    fn persist_active(&self) {
        let result = match self.active.as_ref() {
            Some(state) => self.gateway.put_typed(
                BREAK_ACTIVE_KEY,
                &PersistedBreak {
                    state: state.clone(),
                    break_end_at_ms: state.planned_end_at_ms,
                    was_paused_before_break: false,
                },
            ),
            None => self.gateway.clear(BREAK_ACTIVE_KEY),
        };
        if let Err(error) = result {
            log::warn!("failed to persist {BREAK_ACTIVE_KEY}: {error}");
        }
    }

    fn persist_records(&self) {
        if let Err(error) = self.gateway.put_typed(BREAK_RECORDS_KEY, &self.records) {
            log::warn!("failed to persist {BREAK_RECORDS_KEY}: {error}");
        }
    }
}
