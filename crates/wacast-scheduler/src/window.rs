//! Working-hours gating — pure hour-window logic.
//!
//! Campaigns send inside a half-open local-time window `[start, end)`.
//! `start=0, end=24` denotes "always on" and short-circuits every check.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike};

/// True when the window covers the whole day.
pub fn is_always_on(start_hour: u32, end_hour: u32) -> bool {
    start_hour == 0 && end_hour >= 24
}

/// Is `hour` inside the half-open window `[start_hour, end_hour)`?
pub fn is_within_window(hour: u32, start_hour: u32, end_hour: u32) -> bool {
    if is_always_on(start_hour, end_hour) {
        return true;
    }
    hour >= start_hour && hour < end_hour
}

/// Next instant the window opens, assuming `now` is outside it: today at
/// `start_hour` when the window has not opened yet, otherwise tomorrow at
/// `start_hour`. For an always-on window this is `now` itself.
pub fn next_window_start<Tz: TimeZone>(
    now: DateTime<Tz>,
    start_hour: u32,
    end_hour: u32,
) -> DateTime<Tz> {
    if is_always_on(start_hour, end_hour) {
        return now;
    }
    if now.hour() < start_hour {
        at_hour(now.clone(), start_hour).unwrap_or(now)
    } else {
        tomorrow_at_hour(now, start_hour)
    }
}

/// Tomorrow at `start_hour` sharp. Used when an account exhausted its daily
/// cap: the next attempt belongs to the next calendar day regardless of the
/// current window position.
pub fn tomorrow_at_hour<Tz: TimeZone>(now: DateTime<Tz>, start_hour: u32) -> DateTime<Tz> {
    let tomorrow = now.clone() + Duration::days(1);
    at_hour(tomorrow.clone(), start_hour).unwrap_or(tomorrow)
}

fn at_hour<Tz: TimeZone>(day: DateTime<Tz>, hour: u32) -> Option<DateTime<Tz>> {
    // Falls back to the input on nonexistent local times (DST gaps).
    day.timezone()
        .with_ymd_and_hms(day.year(), day.month(), day.day(), hour, 0, 0)
        .single()
}
