//! Reminder source and durable notification store.
//!
//! The engine treats reminder CRUD as an external collaborator: it only
//! reads active definitions (refreshed each tick) and appends durable
//! notification records for recipients who are offline when an
//! occurrence fires. Both concerns sit behind traits; the SQLite
//! implementation backs them with one database file and a
//! mutex-guarded connection.

use crate::error::{EngineError, Result};
use crate::ledger::now_epoch_millis;
use crate::reminder::{OwnerId, Reminder, ReminderEvent, WireReminder};
use chrono::NaiveDate;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

/// Read-mostly source of reminder definitions.
pub trait ReminderSource: Send + Sync {
    /// Active reminder definitions. Rows that fail validation are
    /// logged and skipped — they never reach the evaluator.
    fn load_active(&self) -> Result<Vec<Reminder>>;
}

/// Durable notification records for offline recipients.
pub trait NotificationStore: Send + Sync {
    /// Append one dispatched notification.
    fn record(&self, owner: OwnerId, event: &ReminderEvent) -> Result<()>;
}

/// SQLite-backed reminder source + notification store.
///
/// Thread-safe via an internal `Mutex<Connection>`; all access is
/// serialized, which is plenty for a once-a-minute read pass plus
/// occasional notification appends.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Store(format!("cannot create store directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| EngineError::Store(format!("cannot open store: {e}")))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Store(format!("cannot open store: {e}")))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace one reminder row, as the CRUD collaborator
    /// would.
    pub fn upsert_reminder(&self, wire: &WireReminder) -> Result<()> {
        let days = serde_json::to_string(&wire.hari_dalam_minggu)
            .map_err(|e| EngineError::Store(format!("cannot encode day set: {e}")))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO reminders \
             (id, pegawai_id, judul_reminder, pesan_reminder, tipe_reminder, \
              waktu_reminder, hari_dalam_minggu, tanggal_spesifik, is_active, \
              created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                wire.id,
                wire.pegawai_id,
                wire.judul_reminder,
                wire.pesan_reminder,
                wire.tipe_reminder,
                wire.waktu_reminder,
                days,
                wire.tanggal_spesifik.map(|d| d.to_string()),
                wire.is_active,
                wire.created_at,
                wire.updated_at,
            ],
        )
        .map_err(|e| EngineError::Store(format!("cannot upsert reminder: {e}")))?;
        Ok(())
    }

    /// Flip a reminder's active flag. Returns `true` when found.
    pub fn set_reminder_active(&self, id: i64, active: bool) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE reminders SET is_active = ?1 WHERE id = ?2",
                params![active, id],
            )
            .map_err(|e| EngineError::Store(format!("cannot update reminder: {e}")))?;
        Ok(changed > 0)
    }

    /// Durable notification history for one owner, newest first.
    ///
    /// This is the read path offline clients use to catch up; the live
    /// bus never replays.
    pub fn notifications_for(&self, owner: OwnerId, limit: usize) -> Result<Vec<ReminderEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT reminder_id, judul, pesan, tipe, scheduled_at \
                 FROM notifications WHERE pegawai_id = ?1 \
                 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| EngineError::Store(format!("cannot query notifications: {e}")))?;
        let rows = stmt
            .query_map(params![owner.0, limit as i64], |row| {
                Ok(ReminderEvent {
                    reminder_id: row.get(0)?,
                    title: row.get(1)?,
                    message: row.get(2)?,
                    tipe: row.get(3)?,
                    scheduled_at: row.get(4)?,
                })
            })
            .map_err(|e| EngineError::Store(format!("cannot read notifications: {e}")))?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(|e| EngineError::Store(format!("bad notification row: {e}")))?);
        }
        Ok(events)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Store("store mutex poisoned".to_owned()))
    }
}

impl ReminderSource for SqliteStore {
    fn load_active(&self) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, pegawai_id, judul_reminder, pesan_reminder, tipe_reminder, \
                 waktu_reminder, hari_dalam_minggu, tanggal_spesifik, is_active, \
                 created_at, updated_at \
                 FROM reminders WHERE is_active = 1",
            )
            .map_err(|e| EngineError::Store(format!("cannot query reminders: {e}")))?;
        let rows = stmt
            .query_map([], row_to_wire)
            .map_err(|e| EngineError::Store(format!("cannot read reminders: {e}")))?;

        let mut reminders = Vec::new();
        for row in rows {
            let wire = row.map_err(|e| EngineError::Store(format!("bad reminder row: {e}")))?;
            let id = wire.id;
            match Reminder::try_from(wire) {
                Ok(reminder) => reminders.push(reminder),
                Err(e) => {
                    tracing::warn!("skipping malformed reminder {id}: {e}");
                }
            }
        }
        Ok(reminders)
    }
}

impl NotificationStore for SqliteStore {
    fn record(&self, owner: OwnerId, event: &ReminderEvent) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notifications \
             (pegawai_id, reminder_id, judul, pesan, tipe, scheduled_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                owner.0,
                event.reminder_id,
                event.title,
                event.message,
                event.tipe,
                event.scheduled_at,
                now_epoch_millis() / 1000,
            ],
        )
        .map_err(|e| EngineError::Store(format!("cannot record notification: {e}")))?;
        Ok(())
    }
}

fn row_to_wire(row: &rusqlite::Row<'_>) -> rusqlite::Result<WireReminder> {
    let days_json: String = row.get(6)?;
    let hari_dalam_minggu = serde_json::from_str(&days_json).unwrap_or_default();
    let tanggal: Option<String> = row.get(7)?;
    let tanggal_spesifik = tanggal.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok());
    Ok(WireReminder {
        id: row.get(0)?,
        pegawai_id: row.get(1)?,
        judul_reminder: row.get(2)?,
        pesan_reminder: row.get(3)?,
        tipe_reminder: row.get(4)?,
        waktu_reminder: row.get(5)?,
        hari_dalam_minggu,
        tanggal_spesifik,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reminders (
            id INTEGER PRIMARY KEY,
            pegawai_id INTEGER NOT NULL,
            judul_reminder TEXT NOT NULL,
            pesan_reminder TEXT NOT NULL,
            tipe_reminder TEXT NOT NULL,
            waktu_reminder TEXT NOT NULL,
            hari_dalam_minggu TEXT NOT NULL DEFAULT '[]',
            tanggal_spesifik TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_reminders_active ON reminders(is_active);
        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pegawai_id INTEGER NOT NULL,
            reminder_id INTEGER NOT NULL,
            judul TEXT NOT NULL,
            pesan TEXT NOT NULL,
            tipe TEXT NOT NULL,
            scheduled_at TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_pegawai
            ON notifications(pegawai_id, id);",
    )
    .map_err(|e| EngineError::Store(format!("cannot apply schema: {e}")))
}
