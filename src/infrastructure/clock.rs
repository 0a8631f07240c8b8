//! Clock source: the only place in the crate that reads real time.
//!
//! Everything else receives epoch milliseconds from a [`Clock`] and turns them into
//! calendar dates through a [`LocalZone`], so tests can drive time deterministically.

use chrono::{DateTime, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock. Clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    pub fn set_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.advance_ms(seconds * 1_000);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Timezone used to decide which calendar day an instant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalZone {
    #[default]
    System,
    Named(Tz),
}

impl LocalZone {
    pub fn parse(name: Option<&str>) -> Result<Self, String> {
        match name.map(str::trim).filter(|value| !value.is_empty()) {
            None => Ok(Self::System),
            Some(value) if value.eq_ignore_ascii_case("local") => Ok(Self::System),
            Some(value) => value
                .parse::<Tz>()
                .map(Self::Named)
                .map_err(|error| format!("unknown timezone '{value}': {error}")),
        }
    }

    pub fn date_of(&self, epoch_ms: i64) -> NaiveDate {
        let utc = utc_from_ms(epoch_ms);
        match self {
            Self::System => utc.with_timezone(&Local).date_naive(),
            Self::Named(tz) => utc.with_timezone(tz).date_naive(),
        }
    }

    /// First instant (epoch ms) of the day after the one containing `epoch_ms`.
    pub fn next_midnight_ms(&self, epoch_ms: i64) -> i64 {
        let next_day = self.date_of(epoch_ms).succ_opt().unwrap_or(NaiveDate::MAX);
        match self {
            Self::System => start_of_day_ms(&Local, next_day),
            Self::Named(tz) => start_of_day_ms(tz, next_day),
        }
    }

    pub fn to_iso(&self, epoch_ms: i64) -> String {
        let utc = utc_from_ms(epoch_ms);
        match self {
            Self::System => utc.with_timezone(&Local).to_rfc3339(),
            Self::Named(tz) => utc.with_timezone(tz).to_rfc3339(),
        }
    }
}

pub fn utc_from_ms(epoch_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(epoch_ms).single().unwrap_or_default()
}

fn start_of_day_ms<Z: TimeZone>(zone: &Z, date: NaiveDate) -> i64 {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or(NaiveDateTime::MIN);
    match zone.from_local_datetime(&midnight) {
        LocalResult::Single(value) => value.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        // Midnight skipped by a DST jump: the day starts at the first valid hour.
        LocalResult::None => (1..=3)
            .filter_map(|hour| date.and_hms_opt(hour, 0, 0))
            .find_map(|candidate| zone.from_local_datetime(&candidate).earliest())
            .map(|value| value.timestamp_millis())
            .unwrap_or_else(|| midnight.and_utc().timestamp_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: &str) -> i64 {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .timestamp_millis()
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000);
        let shared = clock.clone();
        clock.advance_seconds(5);
        assert_eq!(shared.now_ms(), 6_000);
        shared.set_ms(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn named_zone_uses_local_calendar_date() {
        let zone = LocalZone::parse(Some("Asia/Tokyo")).expect("valid zone");
        // 15:30 UTC is 00:30 the next day in Tokyo.
        let instant = ms("2026-02-16T15:30:00Z");
        assert_eq!(zone.date_of(instant).to_string(), "2026-02-17");
        assert_eq!(zone.next_midnight_ms(instant), ms("2026-02-17T15:00:00Z"));
    }

    #[test]
    fn parse_rejects_unknown_zone() {
        assert!(LocalZone::parse(Some("Mars/Olympus")).is_err());
        assert_eq!(LocalZone::parse(None), Ok(LocalZone::System));
        assert_eq!(LocalZone::parse(Some("local")), Ok(LocalZone::System));
    }

    #[test]
    fn skipped_midnight_falls_forward_to_first_valid_hour() {
        // America/Santiago moved clocks from 00:00 to 01:00 on 2022-09-11.
        let zone = LocalZone::parse(Some("America/Santiago")).expect("valid zone");
        let evening = ms("2022-09-11T02:00:00Z"); // 22:00 on 2022-09-10 local
        assert_eq!(zone.date_of(evening).to_string(), "2022-09-10");
        assert_eq!(zone.next_midnight_ms(evening), ms("2022-09-11T04:00:00Z"));
    }
}
