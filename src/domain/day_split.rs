//! Midnight splitting of a study interval into per-date segments.
//!
//! A segment owns `[segment_start, next_midnight)`; the boundary instant belongs to the
//! later day. The last segment takes `duration - Σ earlier` so the pieces always sum to
//! the requested duration exactly.

use crate::infrastructure::clock::LocalZone;
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub struct DaySegment {
    pub date: NaiveDate,
    pub start_ms: i64,
    pub end_ms: i64,
    pub seconds: f64,
}

impl DaySegment {
    pub fn contains_ms(&self, instant_ms: i64) -> bool {
        instant_ms >= self.start_ms && instant_ms < self.end_ms
    }
}

pub fn split_by_local_day(start_ms: i64, duration_seconds: f64, zone: &LocalZone) -> Vec<DaySegment> {
    if duration_seconds <= 0.0 || !duration_seconds.is_finite() {
        return Vec::new();
    }

    let end_ms = start_ms + (duration_seconds * 1000.0).round() as i64;
    let mut segments = Vec::new();
    let mut cursor = start_ms;
    let mut assigned = 0.0;

    loop {
        let midnight = zone.next_midnight_ms(cursor);
        if midnight >= end_ms || midnight <= cursor {
            segments.push(DaySegment {
                date: zone.date_of(cursor),
                start_ms: cursor,
                end_ms,
                seconds: duration_seconds - assigned,
            });
            break;
        }

        let seconds = (midnight - cursor) as f64 / 1000.0;
        segments.push(DaySegment {
            date: zone.date_of(cursor),
            start_ms: cursor,
            end_ms: midnight,
            seconds,
        });
        assigned += seconds;
        cursor = midnight;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;

    fn utc_zone() -> LocalZone {
        LocalZone::parse(Some("UTC")).expect("utc zone")
    }

    fn ms(value: &str) -> i64 {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .timestamp_millis()
    }

    #[test]
    fn same_day_interval_is_single_segment() {
        let segments = split_by_local_day(ms("2026-02-16T09:00:00Z"), 1500.0, &utc_zone());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].date.to_string(), "2026-02-16");
        assert_eq!(segments[0].seconds, 1500.0);
    }

    #[test]
    fn two_hour_session_from_2330_splits_1800_and_5400() {
        let segments = split_by_local_day(ms("2026-02-16T23:30:00Z"), 7200.0, &utc_zone());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].date.to_string(), "2026-02-16");
        assert_eq!(segments[0].seconds, 1800.0);
        assert_eq!(segments[1].date.to_string(), "2026-02-17");
        assert_eq!(segments[1].seconds, 5400.0);
        assert_eq!(segments[0].seconds + segments[1].seconds, 7200.0);
        assert_eq!(segments[1].start_ms, ms("2026-02-17T00:00:00Z"));
    }

    #[test]
    fn interval_ending_exactly_at_midnight_stays_on_first_day() {
        let segments = split_by_local_day(ms("2026-02-16T23:00:00Z"), 3600.0, &utc_zone());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].date.to_string(), "2026-02-16");
    }

    #[test]
    fn interval_starting_at_midnight_belongs_to_new_day() {
        let segments = split_by_local_day(ms("2026-02-17T00:00:00Z"), 60.0, &utc_zone());
        assert_eq!(segments[0].date.to_string(), "2026-02-17");
    }

    #[test]
    fn split_respects_named_zone() {
        let tokyo = LocalZone::parse(Some("Asia/Tokyo")).expect("tokyo");
        // 23:50 Tokyo for 20 minutes.
        let segments = split_by_local_day(ms("2026-02-16T14:50:00Z"), 1200.0, &tokyo);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].date.to_string(), "2026-02-16");
        assert_eq!(segments[0].seconds, 600.0);
        assert_eq!(segments[1].date.to_string(), "2026-02-17");
    }

    #[test]
    fn non_positive_duration_yields_nothing() {
        assert!(split_by_local_day(0, 0.0, &utc_zone()).is_empty());
        assert!(split_by_local_day(0, -5.0, &utc_zone()).is_empty());
    }

    // Property: splits sum exactly to the logged duration with no gap
    proptest! {
        #[test]
        fn property2_segments_sum_to_duration(
            start_offset_s in 0i64..(3 * 86_400),
            duration_s in 1u32..(3 * 86_400)
        ) {
            let start = ms("2026-02-16T00:00:00Z") + start_offset_s * 1000;
            let duration = duration_s as f64;
            let segments = split_by_local_day(start, duration, &utc_zone());

            let total: f64 = segments.iter().map(|segment| segment.seconds).sum();
            prop_assert_eq!(total, duration);
            for pair in segments.windows(2) {
                prop_assert_eq!(pair[0].end_ms, pair[1].start_ms);
                prop_assert!(pair[0].date < pair[1].date);
            }
            prop_assert!(segments.iter().all(|segment| segment.seconds > 0.0));
        }
    }
}
