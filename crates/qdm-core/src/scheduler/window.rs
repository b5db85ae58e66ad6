//! Time-window math for queue schedules.
//!
//! A window opens at `start_time` on an allowed day and closes at `stop_time`
//! (the next day when the stop is not after the start) or at midnight when
//! there is no stop. The day check always applies to the day the window
//! opened.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::Schedule;

/// Days scanned when looking for the next boundary.
const LOOKAHEAD_DAYS: i64 = 8;

fn day_allowed(s: &Schedule, day: NaiveDate) -> bool {
    if s.is_daily {
        s.days.is_empty() || s.days.contains(&day.weekday())
    } else {
        s.just_for_date.map_or(true, |d| d == day)
    }
}

/// `[open, close)` of the window that opens on `day`, ignoring the day check.
fn window_on(start: NaiveTime, stop: Option<NaiveTime>, day: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let open = day.and_time(start);
    let next_midnight = (day + Duration::days(1)).and_time(NaiveTime::MIN);
    let close = match stop {
        None => next_midnight,
        Some(stop) if stop > start => day.and_time(stop),
        Some(stop) => (day + Duration::days(1)).and_time(stop),
    };
    (open, close)
}

/// True when the schedule lets the queue run at `now`.
pub fn is_open(s: &Schedule, now: NaiveDateTime) -> bool {
    let Some(start) = s.start_time else {
        return true;
    };
    let today = now.date();
    [today - Duration::days(1), today].into_iter().any(|day| {
        let (open, close) = window_on(start, s.stop_time, day);
        day_allowed(s, day) && open <= now && now < close
    })
}

/// Next instant after `now` at which `is_open` may change. `None` when the
/// schedule has no start time or nothing changes within the lookahead.
pub fn next_boundary(s: &Schedule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let start = s.start_time?;
    let today = now.date();
    (-1..=LOOKAHEAD_DAYS)
        .map(|offset| today + Duration::days(offset))
        .filter(|day| day_allowed(s, *day))
        .flat_map(|day| {
            let (open, close) = window_on(start, s.stop_time, day);
            [open, close]
        })
        .filter(|t| *t > now)
        .min()
}

/// A one-off schedule whose window has already closed can never open again.
pub fn has_expired(s: &Schedule, now: NaiveDateTime) -> bool {
    if s.is_daily {
        return false;
    }
    match (s.start_time, s.just_for_date) {
        (Some(start), Some(date)) => now >= window_on(start, s.stop_time, date).1,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_time(t(h, m))
    }

    #[test]
    fn no_start_time_is_always_open() {
        let s = Schedule::always();
        assert!(is_open(&s, at(2024, 3, 1, 3, 0)));
        assert_eq!(next_boundary(&s, at(2024, 3, 1, 3, 0)), None);
        assert!(!has_expired(&s, at(2030, 1, 1, 0, 0)));
    }

    #[test]
    fn same_day_window() {
        let s = Schedule::daily(t(9, 0), Some(t(17, 0)), vec![]);
        assert!(!is_open(&s, at(2024, 3, 1, 8, 59)));
        assert!(is_open(&s, at(2024, 3, 1, 9, 0)));
        assert!(is_open(&s, at(2024, 3, 1, 16, 59)));
        assert!(!is_open(&s, at(2024, 3, 1, 17, 0)));
        assert_eq!(next_boundary(&s, at(2024, 3, 1, 8, 0)), Some(at(2024, 3, 1, 9, 0)));
        assert_eq!(next_boundary(&s, at(2024, 3, 1, 10, 0)), Some(at(2024, 3, 1, 17, 0)));
        assert_eq!(next_boundary(&s, at(2024, 3, 1, 18, 0)), Some(at(2024, 3, 2, 9, 0)));
    }

    #[test]
    fn overnight_window_checks_the_opening_day() {
        // 2024-03-01 is a Friday.
        let s = Schedule::daily(t(22, 0), Some(t(6, 0)), vec![Weekday::Fri]);
        assert!(is_open(&s, at(2024, 3, 1, 23, 0)));
        assert!(is_open(&s, at(2024, 3, 2, 5, 59)));
        assert!(!is_open(&s, at(2024, 3, 2, 6, 0)));
        assert!(!is_open(&s, at(2024, 3, 2, 23, 0)), "Saturday is not allowed");
        assert!(!is_open(&s, at(2024, 3, 1, 5, 0)), "Thursday night did not open");
        assert_eq!(next_boundary(&s, at(2024, 3, 2, 1, 0)), Some(at(2024, 3, 2, 6, 0)));
        assert_eq!(next_boundary(&s, at(2024, 3, 2, 7, 0)), Some(at(2024, 3, 8, 22, 0)));
    }

    #[test]
    fn missing_stop_runs_until_midnight() {
        let s = Schedule::daily(t(20, 0), None, vec![]);
        assert!(is_open(&s, at(2024, 3, 1, 23, 59)));
        assert!(!is_open(&s, at(2024, 3, 2, 0, 30)));
        assert_eq!(next_boundary(&s, at(2024, 3, 1, 21, 0)), Some(at(2024, 3, 2, 0, 0)));
    }

    #[test]
    fn weekday_filter() {
        let s = Schedule::daily(t(0, 0), None, vec![Weekday::Mon, Weekday::Wed]);
        assert!(is_open(&s, at(2024, 3, 4, 12, 0)));
        assert!(!is_open(&s, at(2024, 3, 5, 12, 0)));
        assert!(is_open(&s, at(2024, 3, 6, 12, 0)));
    }

    #[test]
    fn one_off_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let s = Schedule::once(date, t(8, 0), Some(t(12, 0)));
        assert!(!is_open(&s, at(2024, 3, 9, 9, 0)));
        assert!(is_open(&s, at(2024, 3, 10, 9, 0)));
        assert!(!has_expired(&s, at(2024, 3, 10, 11, 0)));
        assert!(has_expired(&s, at(2024, 3, 10, 12, 0)));
        assert!(!is_open(&s, at(2024, 3, 11, 9, 0)));
        assert_eq!(next_boundary(&s, at(2024, 3, 10, 13, 0)), None);
    }
}
