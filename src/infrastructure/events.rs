use crate::domain::models::{BreakRecord, SessionPhase, TaskRef};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DisplayTime {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl DisplayTime {
    pub fn from_seconds(total_seconds: u64) -> Self {
        Self {
            hours: total_seconds / 3_600,
            minutes: (total_seconds % 3_600) / 60,
            seconds: total_seconds % 60,
        }
    }
}

/// Notifications for rendering/audio collaborators.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClockEvent {
    Tick(DisplayTime),
    #[serde(rename_all = "camelCase")]
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    #[serde(rename_all = "camelCase")]
    DayLogged {
        date: String,
        seconds_added: f64,
        task: Option<TaskRef>,
        breaks: Option<Vec<BreakRecord>>,
    },
    #[serde(rename_all = "camelCase")]
    BreakTick { remaining_seconds: u64 },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ClockEvent);
}

#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: UnboundedSender<ClockEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: UnboundedSender<ClockEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ClockEvent) {
        // Receiver gone means the host is shutting down.
        let _ = self.sender.send(event);
    }
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ClockEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<ClockEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn day_logged(&self) -> Vec<ClockEvent> {
        self.events()
            .into_iter()
            .filter(|event| matches!(event, ClockEvent::DayLogged { .. }))
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ClockEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
