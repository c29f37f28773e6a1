//! Recurrence evaluation.
//!
//! Pure decision function: given a reminder definition and the current
//! minute in the org timezone, does the reminder fire now, and under
//! which occurrence key? The key is the calendar date of the firing;
//! the fire ledger turns "matches now" into "fires exactly once".
//!
//! The tick interval is at most the matching granularity (one minute),
//! so each due minute is visited at least once under continuous
//! operation. Missed minutes (downtime) are skipped, never caught up.

use crate::reminder::{Reminder, ReminderKind};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};

/// Decide whether `reminder` fires at `now` (minute granularity).
///
/// Returns the occurrence key for this firing, or `None` when the
/// schedule does not match. Inactive reminders never fire.
pub fn fires_at(reminder: &Reminder, now: DateTime<FixedOffset>) -> Option<NaiveDate> {
    if !reminder.active {
        return None;
    }
    if !reminder.time.matches(now.time()) {
        return None;
    }

    let today = now.date_naive();
    match &reminder.kind {
        ReminderKind::Daily => Some(today),
        ReminderKind::Weekly(days) => days.contains(today.weekday()).then_some(today),
        ReminderKind::Monthly { anchor } => {
            // Anchor days past the end of a short month fire on the
            // month's last day instead of skipping the month.
            let last = days_in_month(today.year(), today.month());
            let target = anchor.day().min(last);
            (today.day() == target).then_some(today)
        }
        ReminderKind::Once(date) => (today == *date).then_some(*date),
    }
}

/// Number of days in the given month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}
