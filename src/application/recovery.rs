//! Startup reconciliation of persisted clock state against the current time.
//!
//! Persisted "remaining" figures are never trusted: elapsed time is recomputed from the
//! stored anchor, so a timer that ran out while the process was gone is completed once,
//! with its original start.

use crate::application::breaks::BREAK_ACTIVE_KEY;
use crate::application::session_clock::{
    SessionClock, SessionServices, TIMER_ACCUMULATED_KEY, TIMER_ACTIVE_TASK_KEY, TIMER_ANCHOR_KEY,
    TIMER_INITIAL_KEY, TIMER_LAST_ACTIVE_DATE_KEY, TIMER_MODE_KEY, TIMER_PHASE_KEY,
    TIMER_SESSION_START_KEY,
};
use crate::domain::models::{SessionMode, SessionPhase, SessionState};

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    NothingPersisted,
    DateRolledOver { last_active_date: Option<String> },
    CompletedWhileAway { logged_seconds: u64 },
    Resumed(SessionMode),
    Restored(SessionPhase),
    BreakRestored { remaining_seconds: u64 },
    BreakExpiredWhileAway,
}

#[derive(Debug, Clone, PartialEq)]
struct PersistedTimer {
    state: SessionState,
    last_active_date: Option<String>,
}

async fn load_persisted_timer(services: &SessionServices) -> Option<PersistedTimer> {
    let gateway = services.gateway.as_ref();
    let phase = gateway
        .get_typed::<Option<String>>(TIMER_PHASE_KEY, None)
        .await
        .and_then(|value| SessionPhase::parse(&value))?;
    let mode = gateway
        .get_typed::<Option<String>>(TIMER_MODE_KEY, None)
        .await
        .and_then(|value| SessionMode::parse(&value))
        .unwrap_or_default();

    let mut state = SessionState {
        mode,
        phase,
        initial_duration_seconds: gateway.get_typed(TIMER_INITIAL_KEY, 0u64).await,
        anchor_ms: gateway.get_typed(TIMER_ANCHOR_KEY, None).await,
        accumulated_seconds: gateway.get_typed(TIMER_ACCUMULATED_KEY, 0.0f64).await,
        active_task_id: gateway.get_typed(TIMER_ACTIVE_TASK_KEY, None).await,
        session_start_ms: gateway.get_typed(TIMER_SESSION_START_KEY, None).await,
    };
    if !state.accumulated_seconds.is_finite() || state.accumulated_seconds < 0.0 {
        state.accumulated_seconds = 0.0;
    }
    match (state.phase, state.anchor_ms) {
        (SessionPhase::Running, None) => {
            log::warn!("persisted running session has no anchor; restoring as paused");
            state.phase = SessionPhase::Paused;
        }
        (SessionPhase::Idle | SessionPhase::Paused | SessionPhase::Completed, Some(_)) => {
            state.anchor_ms = None;
        }
        _ => {}
    }

    Some(PersistedTimer {
        state,
        last_active_date: gateway
            .get_typed(TIMER_LAST_ACTIVE_DATE_KEY, None)
            .await,
    })
}

/// Builds the session clock for this process from whatever the last one left behind.
pub async fn recover(services: SessionServices) -> (SessionClock, RecoveryOutcome) {
    let persisted = load_persisted_timer(&services).await;
    let mut session = SessionClock::new(services.clone());
    let Some(PersistedTimer {
        state,
        last_active_date,
    }) = persisted
    else {
        log::info!("no persisted session; starting idle");
        return (session, RecoveryOutcome::NothingPersisted);
    };

    let now = services.clock.now_ms();
    let today = services.zone.date_of(now).format("%Y-%m-%d").to_string();
    let (active_break, break_records) = session.breaks().load_persisted();

    if last_active_date.as_deref() != Some(today.as_str()) {
        log::info!(
            "last active on {}; today is {today}; session dropped without logging",
            last_active_date.as_deref().unwrap_or("unknown")
        );
        session.restore(
            SessionState {
                active_task_id: state.active_task_id.clone(),
                ..SessionState::idle(state.mode)
            },
            None,
            Vec::new(),
        );
        session.discard_breaks();
        session.persist_state();
        return (session, RecoveryOutcome::DateRolledOver { last_active_date });
    }

    let break_applies = state.mode == SessionMode::Timer && state.phase == SessionPhase::Paused;
    if let Some(persisted_break) = active_break {
        if break_applies {
            let planned_end = persisted_break.state.planned_end_at_ms;
            session.restore(state, Some(persisted_break.state), break_records);
            if now < planned_end {
                let remaining_seconds = ((planned_end - now) as f64 / 1000.0).ceil() as u64;
                log::info!("break restored with {remaining_seconds}s remaining");
                session.persist_state();
                return (session, RecoveryOutcome::BreakRestored { remaining_seconds });
            }
            session.finish_expired_break(now);
            log::info!("break expired while away; study clock resumed");
            return (session, RecoveryOutcome::BreakExpiredWhileAway);
        }
        log::warn!("discarding persisted break for a {} session", state.phase.as_str());
        if let Err(error) = services.gateway.clear(BREAK_ACTIVE_KEY) {
            log::warn!("failed to clear {BREAK_ACTIVE_KEY}: {error}");
        }
    }

    let phase = state.phase;
    let mode = state.mode;
    let elapsed = state.elapsed_seconds(now);
    let initial = state.initial_duration_seconds;
    session.restore(state, None, break_records);

    let outcome = match (mode, phase) {
        (SessionMode::Timer, SessionPhase::Running) if elapsed >= initial as f64 => {
            session.complete();
            log::info!("timer finished while away; logged {initial}s");
            RecoveryOutcome::CompletedWhileAway {
                logged_seconds: initial,
            }
        }
        (_, SessionPhase::Running) => {
            log::info!("resuming {} from persisted anchor", mode.as_str());
            session.persist_state();
            RecoveryOutcome::Resumed(mode)
        }
        (_, phase) => {
            session.persist_state();
            RecoveryOutcome::Restored(phase)
        }
    };
    (session, outcome)
}
