//! Organization-timezone clock.
//!
//! Every recurrence decision runs against one fixed, explicitly
//! configured timezone — never the host's or a client's local time.
//! The offset comes from config as a `"+07:00"`-style string and is a
//! fatal startup error when unparseable.

use crate::error::{EngineError, Result};
use chrono::{DateTime, FixedOffset, Timelike, Utc};

/// Fixed organization timezone expressed as a UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgTimezone {
    offset: FixedOffset,
}

impl OrgTimezone {
    /// Parse an offset string such as `"+07:00"` or `"-03:30"`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (sign, rest) = match s.split_at_checked(1) {
            Some(("+", rest)) => (1i32, rest),
            Some(("-", rest)) => (-1i32, rest),
            _ => {
                return Err(EngineError::Config(format!(
                    "timezone offset must start with '+' or '-': {s:?}"
                )));
            }
        };

        let (hours, minutes) = rest.split_once(':').ok_or_else(|| {
            EngineError::Config(format!("timezone offset must be ±HH:MM: {s:?}"))
        })?;
        let hours: u32 = hours
            .parse()
            .map_err(|_| EngineError::Config(format!("bad hour in timezone offset: {s:?}")))?;
        let minutes: u32 = minutes
            .parse()
            .map_err(|_| EngineError::Config(format!("bad minute in timezone offset: {s:?}")))?;
        if hours > 14 || minutes > 59 {
            return Err(EngineError::Config(format!(
                "timezone offset out of range: {s:?}"
            )));
        }

        let secs = sign * i32::try_from(hours * 3600 + minutes * 60).unwrap_or(i32::MAX);
        let offset = FixedOffset::east_opt(secs)
            .ok_or_else(|| EngineError::Config(format!("timezone offset out of range: {s:?}")))?;
        Ok(Self { offset })
    }

    /// Current wall-clock time in the org timezone at minute granularity.
    pub fn now_minute(&self) -> DateTime<FixedOffset> {
        truncate_to_minute(Utc::now().with_timezone(&self.offset))
    }

    /// The underlying UTC offset.
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Drop seconds and sub-second precision from a timestamp.
///
/// The evaluator matches on HH:MM only, so every instant inside one
/// minute is the same logical tick time.
pub fn truncate_to_minute(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}
