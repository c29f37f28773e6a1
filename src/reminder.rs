//! Reminder data model and wire-record decoding.
//!
//! The CRUD collaborator stores reminders with Indonesian field names
//! (`pegawai_id`, `tipe_reminder`, ...). The engine decodes those rows
//! into a typed [`Reminder`] whose [`ReminderKind`] carries the day set
//! or anchor date inside the variant, so "day set non-empty iff weekly"
//! and "date present iff once/monthly" hold by construction instead of
//! by runtime checks scattered over the scheduler.

use crate::error::{EngineError, Result};
use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Employee identifier owning a reminder (`pegawai_id` upstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time of day at minute granularity, org timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    /// Hour of day (0-23).
    pub hour: u8,
    /// Minute of hour (0-59).
    pub minute: u8,
}

impl TimeOfDay {
    /// Parse a `"HH:MM"` string.
    pub fn parse(s: &str) -> Result<Self> {
        let (hour, minute) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| EngineError::Validation(format!("waktu_reminder must be HH:MM: {s:?}")))?;
        let hour: u8 = hour
            .parse()
            .map_err(|_| EngineError::Validation(format!("bad hour in waktu_reminder: {s:?}")))?;
        let minute: u8 = minute
            .parse()
            .map_err(|_| EngineError::Validation(format!("bad minute in waktu_reminder: {s:?}")))?;
        if hour > 23 || minute > 59 {
            return Err(EngineError::Validation(format!(
                "waktu_reminder out of range: {s:?}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Whether the given clock time falls in this minute.
    pub fn matches(&self, t: NaiveTime) -> bool {
        use chrono::Timelike;
        u8::try_from(t.hour()).is_ok_and(|h| h == self.hour)
            && u8::try_from(t.minute()).is_ok_and(|m| m == self.minute)
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Non-empty set of weekdays for weekly reminders.
///
/// Stored as a bitmask with bit 0 = Monday (Senin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySet(u8);

impl DaySet {
    /// Build from chrono weekdays. Empty input is a validation error.
    pub fn from_weekdays(days: &[Weekday]) -> Result<Self> {
        let mut mask = 0u8;
        for day in days {
            mask |= 1 << day.num_days_from_monday();
        }
        if mask == 0 {
            return Err(EngineError::Validation(
                "weekly reminder requires a non-empty day set".to_owned(),
            ));
        }
        Ok(Self(mask))
    }

    /// Build from upstream Indonesian day names (`Senin`..`Minggu`).
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut days = Vec::with_capacity(names.len());
        for name in names {
            days.push(weekday_from_name(name.as_ref())?);
        }
        Self::from_weekdays(&days)
    }

    /// Whether the set contains the given weekday.
    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    /// Upstream day names in Monday-first order, for persistence.
    pub fn names(&self) -> Vec<&'static str> {
        const NAMES: [&str; 7] = [
            "Senin", "Selasa", "Rabu", "Kamis", "Jumat", "Sabtu", "Minggu",
        ];
        (0..7)
            .filter(|bit| self.0 & (1 << bit) != 0)
            .map(|bit| NAMES[bit as usize])
            .collect()
    }
}

fn weekday_from_name(name: &str) -> Result<Weekday> {
    match name.trim().to_lowercase().as_str() {
        "senin" => Ok(Weekday::Mon),
        "selasa" => Ok(Weekday::Tue),
        "rabu" => Ok(Weekday::Wed),
        "kamis" => Ok(Weekday::Thu),
        "jumat" | "jum'at" => Ok(Weekday::Fri),
        "sabtu" => Ok(Weekday::Sat),
        "minggu" => Ok(Weekday::Sun),
        other => Err(EngineError::Validation(format!("unknown weekday: {other:?}"))),
    }
}

/// Recurrence cadence of a reminder.
///
/// The day set exists only on the weekly variant and the anchor date
/// only on monthly/once, enforcing the upstream invariants in the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderKind {
    /// Fires every day at the reminder's time.
    Daily,
    /// Fires on the listed weekdays.
    Weekly(DaySet),
    /// Fires monthly on the anchor date's day-of-month. In months too
    /// short for the anchor day it fires on the month's last day.
    Monthly {
        /// Source date whose day-of-month anchors each firing.
        anchor: NaiveDate,
    },
    /// Fires once, on the given date.
    Once(NaiveDate),
}

impl ReminderKind {
    /// Upstream type label (`tipe_reminder` value).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Daily => "Harian",
            Self::Weekly(_) => "Mingguan",
            Self::Monthly { .. } => "Bulanan",
            Self::Once(_) => "Sekali",
        }
    }
}

/// A reminder definition as seen by the engine.
#[derive(Debug, Clone)]
pub struct Reminder {
    /// Reminder record id.
    pub id: i64,
    /// Owning employee.
    pub owner: OwnerId,
    /// Short title shown in the notification.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Recurrence cadence.
    pub kind: ReminderKind,
    /// Firing time of day, org timezone.
    pub time: TimeOfDay,
    /// Inactive reminders never fire, regardless of kind.
    pub active: bool,
    /// Unix epoch seconds.
    pub created_at: u64,
    /// Unix epoch seconds.
    pub updated_at: u64,
}

/// Raw reminder row as the CRUD collaborator stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireReminder {
    pub id: i64,
    pub pegawai_id: i64,
    pub judul_reminder: String,
    pub pesan_reminder: String,
    pub tipe_reminder: String,
    pub waktu_reminder: String,
    #[serde(default)]
    pub hari_dalam_minggu: Vec<String>,
    #[serde(default)]
    pub tanggal_spesifik: Option<NaiveDate>,
    pub is_active: bool,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl TryFrom<WireReminder> for Reminder {
    type Error = EngineError;

    fn try_from(wire: WireReminder) -> Result<Self> {
        let time = TimeOfDay::parse(&wire.waktu_reminder)?;
        let kind = match wire.tipe_reminder.trim() {
            "Harian" => ReminderKind::Daily,
            "Mingguan" => ReminderKind::Weekly(DaySet::from_names(&wire.hari_dalam_minggu)?),
            "Bulanan" => {
                let anchor = wire.tanggal_spesifik.ok_or_else(|| {
                    EngineError::Validation(format!(
                        "monthly reminder {} requires tanggal_spesifik",
                        wire.id
                    ))
                })?;
                ReminderKind::Monthly { anchor }
            }
            "Sekali" => {
                let date = wire.tanggal_spesifik.ok_or_else(|| {
                    EngineError::Validation(format!(
                        "one-shot reminder {} requires tanggal_spesifik",
                        wire.id
                    ))
                })?;
                ReminderKind::Once(date)
            }
            other => {
                return Err(EngineError::Validation(format!(
                    "unknown tipe_reminder: {other:?}"
                )));
            }
        };

        Ok(Reminder {
            id: wire.id,
            owner: OwnerId(wire.pegawai_id),
            title: wire.judul_reminder,
            message: wire.pesan_reminder,
            kind,
            time,
            active: wire.is_active,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        })
    }
}

/// Payload pushed to live subscribers and written to the durable store.
///
/// Field names are the wire contract consumed by dashboard clients; do
/// not rename without versioning the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderEvent {
    #[serde(rename = "reminderId")]
    pub reminder_id: i64,
    pub title: String,
    pub message: String,
    /// Upstream type label (`Harian`, `Mingguan`, `Bulanan`, `Sekali`).
    pub tipe: String,
    /// RFC 3339 timestamp of the matched minute, org timezone.
    pub scheduled_at: String,
}

impl ReminderEvent {
    /// Render the plain-text form handed to the delivery sink.
    pub fn render_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.message)
    }
}
