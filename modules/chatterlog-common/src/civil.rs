//! Civil-time handling.
//!
//! Every stored timestamp in the system is a naive datetime in one fixed
//! civil timezone. The upstream feed prints wall-clock times in that zone
//! (without a year), and retention cutoffs are computed in the same zone, so
//! comparisons never cross timezone boundaries.

use chrono::{Datelike, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// The single fixed civil timezone shared by the whole system.
pub const CIVIL_TZ: Tz = chrono_tz::America::Chicago;

/// Current wall-clock time in the civil timezone.
pub fn civil_now() -> NaiveDateTime {
    Utc::now().with_timezone(&CIVIL_TZ).naive_local()
}

/// The current calendar year in the civil timezone, injected into feed
/// fragments because the upstream format omits it.
pub fn civil_year() -> i32 {
    Utc::now().with_timezone(&CIVIL_TZ).year()
}

/// Accepted feed timestamp shapes, tried in order. The upstream format has
/// drifted between second and minute resolution before.
const FEED_FORMATS: &[&str] = &[
    "%b %d, %I:%M:%S %p %Y",
    "%b %d, %I:%M %p %Y",
    "%b %d %I:%M:%S %p %Y",
    "%b %d %I:%M %p %Y",
];

/// Resolve a feed timestamp fragment (e.g. `"Jan 5, 2:30:00 PM"`) to an
/// absolute civil instant by appending `year`.
///
/// Returns `None` when the fragment does not parse or names a wall-clock
/// time that does not exist in the civil zone (spring-forward gap); callers
/// skip the entry. An ambiguous time (fall-back hour) resolves to its
/// earliest interpretation.
pub fn parse_feed_timestamp(fragment: &str, year: i32) -> Option<NaiveDateTime> {
    let candidate = format!("{} {year}", fragment.trim());

    let naive = FEED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&candidate, fmt).ok())?;

    match CIVIL_TZ.from_local_datetime(&naive) {
        LocalResult::Single(_) | LocalResult::Ambiguous(_, _) => Some(naive),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_with_seconds() {
        let ts = parse_feed_timestamp("Jan 5, 2:30:00 PM", 2026).unwrap();
        assert_eq!((ts.month(), ts.day(), ts.year()), (1, 5, 2026));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (14, 30, 0));
    }

    #[test]
    fn parses_without_seconds() {
        let ts = parse_feed_timestamp("Dec 31, 11:59 PM", 2025).unwrap();
        assert_eq!((ts.month(), ts.day()), (12, 31));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (23, 59, 0));
    }

    #[test]
    fn round_trip_reproduces_components() {
        let ts = parse_feed_timestamp("Jan 5, 2:30:00 PM", 2026).unwrap();
        assert_eq!(ts.format("%b %-d, %-I:%M:%S %p %Y").to_string(), "Jan 5, 2:30:00 PM 2026");
    }

    #[test]
    fn garbage_is_skipped() {
        assert!(parse_feed_timestamp("not a time", 2026).is_none());
        assert!(parse_feed_timestamp("", 2026).is_none());
    }

    #[test]
    fn spring_forward_gap_is_skipped() {
        // 2:30 AM on 2026-03-08 does not exist in America/Chicago.
        assert!(parse_feed_timestamp("Mar 8, 2:30:00 AM", 2026).is_none());
        assert!(parse_feed_timestamp("Mar 8, 3:30:00 AM", 2026).is_some());
    }
}
