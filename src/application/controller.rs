use crate::application::session_clock::{ClockSnapshot, CommandOutcome, SessionClock};
use crate::domain::models::SessionPhase;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockCommand {
    Start(u64),
    Pause,
    Resume,
    Reset,
    ToggleMode,
    StartBreak(u32),
    EndBreak,
    QuitBreak,
    SetActiveTask(Option<String>),
}

type TickerSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Serializes commands and ticks onto one session and owns at most one ticker of each kind.
#[derive(Clone)]
pub struct TimerController {
    session: Arc<Mutex<SessionClock>>,
    ticker: TickerSlot,
    break_ticker: TickerSlot,
    tick_interval: Duration,
    break_tick_interval: Duration,
}

impl TimerController {
    pub fn new(session: SessionClock, tick_interval: Duration, break_tick_interval: Duration) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            ticker: Arc::new(Mutex::new(None)),
            break_ticker: Arc::new(Mutex::new(None)),
            tick_interval,
            break_tick_interval,
        }
    }

    /// Starts tickers for whatever state recovery left the session in.
    pub async fn resume_tickers(&self) {
        self.sync_tickers().await;
    }

    pub async fn dispatch(&self, command: ClockCommand) -> CommandOutcome {
        let outcome = {
            let mut session = self.session.lock().await;
            match command {
                ClockCommand::Start(duration_seconds) => session.start(duration_seconds),
                ClockCommand::Pause => session.pause(),
                ClockCommand::Resume => session.resume(),
                ClockCommand::Reset => session.reset(),
                ClockCommand::ToggleMode => session.toggle_mode(),
                ClockCommand::StartBreak(minutes) => session.start_break(minutes),
                ClockCommand::EndBreak => session.end_break(),
                ClockCommand::QuitBreak => session.quit_break(),
                ClockCommand::SetActiveTask(task_id) => session.set_active_task(task_id.as_deref()),
            }
        };
        if outcome.is_applied() {
            self.sync_tickers().await;
        }
        outcome
    }

    pub async fn snapshot(&self) -> ClockSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Runs `operation` with exclusive access to the session.
    pub async fn with_session<R>(&self, operation: impl FnOnce(&mut SessionClock) -> R) -> R {
        let mut session = self.session.lock().await;
        operation(&mut session)
    }

    pub async fn is_ticking(&self) -> bool {
        is_live(&self.ticker).await
    }

    pub async fn is_break_ticking(&self) -> bool {
        is_live(&self.break_ticker).await
    }

    pub async fn shutdown(&self) {
        cancel(&self.ticker).await;
        cancel(&self.break_ticker).await;
    }

    async fn sync_tickers(&self) {
        let (running, on_break) = {
            let session = self.session.lock().await;
            (session.phase() == SessionPhase::Running, session.is_on_break())
        };

        if running {
            spawn_ticker(self.session.clone(), self.ticker.clone(), self.tick_interval).await;
        } else {
            cancel(&self.ticker).await;
        }

        if on_break {
            spawn_break_ticker(
                self.session.clone(),
                self.break_ticker.clone(),
                self.break_tick_interval,
                self.ticker.clone(),
                self.tick_interval,
            )
            .await;
        } else {
            cancel(&self.break_ticker).await;
        }
    }
}

async fn is_live(slot: &TickerSlot) -> bool {
    slot.lock()
        .await
        .as_ref()
        .is_some_and(|handle| !handle.is_finished())
}

async fn cancel(slot: &TickerSlot) {
    if let Some(handle) = slot.lock().await.take() {
        handle.abort();
    }
}

async fn spawn_ticker(session: Arc<Mutex<SessionClock>>, slot: TickerSlot, tick_interval: Duration) {
    let mut guard = slot.lock().await;
    if let Some(handle) = guard.take() {
        handle.abort();
    }

    let handle = tokio::spawn(async move {
        let mut interval = time::interval(tick_interval);
        loop {
            interval.tick().await;
            let mut session = session.lock().await;
            if session.phase() != SessionPhase::Running {
                break;
            }
            session.tick();
            if session.phase() != SessionPhase::Running {
                break;
            }
        }
    });
    *guard = Some(handle);
}

async fn spawn_break_ticker(
    session: Arc<Mutex<SessionClock>>,
    slot: TickerSlot,
    break_tick_interval: Duration,
    ticker: TickerSlot,
    tick_interval: Duration,
) {
    let mut guard = slot.lock().await;
    if let Some(handle) = guard.take() {
        handle.abort();
    }

    let handle = tokio::spawn(async move {
        let mut interval = time::interval(break_tick_interval);
        loop {
            interval.tick().await;
            let resumed = {
                let mut session = session.lock().await;
                if !session.is_on_break() {
                    break;
                }
                session.break_tick();
                if session.is_on_break() {
                    continue;
                }
                session.phase() == SessionPhase::Running
            };
            if resumed {
                spawn_ticker(session.clone(), ticker.clone(), tick_interval).await;
            }
            break;
        }
    });
    *guard = Some(handle);
}
