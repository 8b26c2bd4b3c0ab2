//! Duration arithmetic and time rendering shared by session and task views.
//!
//! Every display of an elapsed span goes through [`format_hms`] so that a
//! whole-session total and a single task render identically.

use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

const TZ_OFFSET_MINUTES_MIN: i32 = -14 * 60;
const TZ_OFFSET_MINUTES_MAX: i32 = 14 * 60;

const MS_PER_SECOND: i64 = 1000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;

/// Milliseconds elapsed from `start` to `end`. Callers guarantee `start <= end`.
pub fn duration_ms(start: OffsetDateTime, end: OffsetDateTime) -> i64 {
    (end - start).whole_milliseconds() as i64
}

/// `HH:MM:SS` with floor semantics. Hours never roll over into days.
pub fn format_hms(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / MS_PER_HOUR;
    let minutes = (ms % MS_PER_HOUR) / MS_PER_MINUTE;
    let seconds = (ms % MS_PER_MINUTE) / MS_PER_SECOND;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// `<H>h <M>m`, floor of whole hours and of the remaining minutes.
pub fn format_hours_minutes(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / MS_PER_HOUR;
    let minutes = (ms % MS_PER_HOUR) / MS_PER_MINUTE;
    format!("{hours}h {minutes}m")
}

pub fn to_unix_ms(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn from_unix_ms(ms: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}

pub fn to_rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

pub fn normalize_tz_offset_minutes(v: Option<i32>) -> i32 {
    v.unwrap_or(0)
        .clamp(TZ_OFFSET_MINUTES_MIN, TZ_OFFSET_MINUTES_MAX)
}

pub fn tz_offset_from_minutes(minutes: i32) -> UtcOffset {
    UtcOffset::from_whole_seconds(minutes.saturating_mul(60)).unwrap_or(UtcOffset::UTC)
}

/// Wall-clock `HH:MM:SS` of `t` in the given offset.
pub fn format_local_time(t: OffsetDateTime, tz_offset: UtcOffset) -> String {
    let local = t.to_offset(tz_offset);
    format!(
        "{:02}:{:02}:{:02}",
        local.hour(),
        local.minute(),
        local.second()
    )
}

pub fn format_local_hhmm(t: OffsetDateTime, tz_offset: UtcOffset) -> String {
    let local = t.to_offset(tz_offset);
    format!("{:02}:{:02}", local.hour(), local.minute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    #[test]
    fn duration_is_end_minus_start_in_ms() {
        let a = datetime!(2024-01-01 09:00:00 UTC);
        let b = datetime!(2024-01-01 10:01:01.250 UTC);
        assert_eq!(duration_ms(a, b), 3_661_250);
        assert_eq!(duration_ms(a, a), 0);
    }

    #[test]
    fn format_hms_floors_each_component() {
        assert_eq!(format_hms(3_661_000), "01:01:01");
        assert_eq!(format_hms(3_661_999), "01:01:01");
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(59_999), "00:00:59");
    }

    #[test]
    fn format_hms_does_not_roll_over_days() {
        assert_eq!(format_hms(25 * MS_PER_HOUR), "25:00:00");
        assert_eq!(format_hms(123 * MS_PER_HOUR + 4 * MS_PER_MINUTE), "123:04:00");
    }

    #[test]
    fn format_hours_minutes_floors() {
        assert_eq!(format_hours_minutes(30 * MS_PER_MINUTE), "0h 30m");
        assert_eq!(format_hours_minutes(7 * MS_PER_HOUR + 30 * MS_PER_MINUTE + 59_999), "7h 30m");
    }

    #[test]
    fn unix_ms_round_trip_keeps_millisecond_precision() {
        let t = datetime!(2024-01-01 09:00:00.123 UTC);
        let ms = to_unix_ms(t);
        assert_eq!(ms, 1_704_099_600_123);
        assert_eq!(from_unix_ms(ms), Some(t));
    }

    #[test]
    fn local_time_uses_the_offset() {
        let t = datetime!(2024-01-01 09:05:07 UTC);
        let tz = tz_offset_from_minutes(9 * 60);
        assert_eq!(format_local_time(t, tz), "18:05:07");
        assert_eq!(format_local_hhmm(t, tz), "18:05");
    }

    #[test]
    fn tz_offset_is_clamped() {
        assert_eq!(normalize_tz_offset_minutes(None), 0);
        assert_eq!(normalize_tz_offset_minutes(Some(20 * 60)), 14 * 60);
        assert_eq!(normalize_tz_offset_minutes(Some(-20 * 60)), -14 * 60);
    }

    fn parse_hms(s: &str) -> (i64, i64, i64) {
        let parts: Vec<i64> = s.split(':').map(|p| p.parse().unwrap()).collect();
        (parts[0], parts[1], parts[2])
    }

    proptest! {
        #[test]
        fn duration_is_the_millisecond_difference(
            start_ms in 0i64..4_000_000_000_000,
            span in 0i64..10_000_000_000,
        ) {
            let a = from_unix_ms(start_ms).unwrap();
            let b = from_unix_ms(start_ms + span).unwrap();
            prop_assert_eq!(duration_ms(a, b), span);
        }

        #[test]
        fn hms_is_the_floor_of_the_span(ms in 0i64..1_000_000_000_000) {
            let (h, m, s) = parse_hms(&format_hms(ms));
            prop_assert!(m < 60 && s < 60);
            prop_assert_eq!(
                h * MS_PER_HOUR + m * MS_PER_MINUTE + s * MS_PER_SECOND,
                ms - ms % MS_PER_SECOND
            );
        }

        #[test]
        fn hours_minutes_is_the_floor_of_the_span(ms in 0i64..1_000_000_000_000) {
            let out = format_hours_minutes(ms);
            let (h, m) = out.split_once("h ").unwrap();
            let h: i64 = h.parse().unwrap();
            let m: i64 = m.trim_end_matches('m').parse().unwrap();
            prop_assert!(m < 60);
            prop_assert_eq!(h * MS_PER_HOUR + m * MS_PER_MINUTE, ms - ms % MS_PER_MINUTE);
        }
    }
}
