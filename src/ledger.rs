//! Fire ledger: exactly-once dedup of reminder occurrences.
//!
//! A claim is the pair (reminder id, occurrence date). Claims are
//! appended to a JSONL file guarded by a sibling lock file, so the
//! first claimant wins and every later claim for the same pair is
//! refused — across ticks landing in the same minute, across process
//! restarts, and across engine instances sharing the file.
//!
//! The ledger is independent of the reminder's own lifecycle: deleting
//! or editing a reminder never un-claims an occurrence.

use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Pruning never removes entries younger than this, so any occurrence
/// inside the supported recurrence horizon (one year, bounding monthly
/// anchors) stays guarded against a re-fire.
pub const RETENTION_FLOOR_DAYS: u32 = 400;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FireRecord {
    reminder_id: i64,
    fired_on: NaiveDate,
    fired_at_ms: u64,
}

/// File-backed dedup ledger of fired occurrences.
pub struct FireLedger {
    path: PathBuf,
    seen: HashSet<(i64, NaiveDate)>,
}

impl FireLedger {
    /// Create a ledger bound to a JSONL file path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            seen: HashSet::new(),
        }
    }

    /// Claim one occurrence. Returns `true` only for the first caller
    /// of a given (reminder, date) pair; concurrent racers on the same
    /// file get exactly one winner.
    pub fn try_claim(&mut self, reminder_id: i64, fired_on: NaiveDate) -> Result<bool> {
        let _guard = self.acquire_write_guard(Duration::from_millis(1500))?;
        self.refresh_seen_from_disk()?;

        if self.seen.contains(&(reminder_id, fired_on)) {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Ledger(format!("failed to create ledger directory: {e}"))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EngineError::Ledger(format!("failed to open fire ledger: {e}")))?;

        let record = FireRecord {
            reminder_id,
            fired_on,
            fired_at_ms: now_epoch_millis(),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| EngineError::Ledger(format!("failed to encode fire record: {e}")))?;
        writeln!(file, "{json}")
            .map_err(|e| EngineError::Ledger(format!("failed to append fire record: {e}")))?;

        self.seen.insert((reminder_id, fired_on));
        Ok(true)
    }

    /// Drop entries older than the retention window, measured from
    /// `today`. The window is floored at [`RETENTION_FLOOR_DAYS`].
    /// Returns the number of pruned entries.
    pub fn prune(&mut self, retention_days: u32, today: NaiveDate) -> Result<usize> {
        let window = u64::from(retention_days.max(RETENTION_FLOOR_DAYS));
        let cutoff = today - chrono::Days::new(window);

        let _guard = self.acquire_write_guard(Duration::from_millis(1500))?;
        let records = self.read_records_from_disk()?;
        let kept: Vec<&FireRecord> = records.iter().filter(|r| r.fired_on >= cutoff).collect();
        let pruned = records.len() - kept.len();
        if pruned == 0 {
            return Ok(0);
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut body = String::new();
        for record in &kept {
            let json = serde_json::to_string(record)
                .map_err(|e| EngineError::Ledger(format!("failed to encode fire record: {e}")))?;
            body.push_str(&json);
            body.push('\n');
        }
        std::fs::write(&tmp_path, body)
            .map_err(|e| EngineError::Ledger(format!("failed to write pruned ledger: {e}")))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| EngineError::Ledger(format!("failed to finalize pruned ledger: {e}")))?;

        self.seen = kept
            .into_iter()
            .map(|r| (r.reminder_id, r.fired_on))
            .collect();
        Ok(pruned)
    }

    fn refresh_seen_from_disk(&mut self) -> Result<()> {
        self.seen = self
            .read_records_from_disk()?
            .into_iter()
            .map(|r| (r.reminder_id, r.fired_on))
            .collect();
        Ok(())
    }

    fn read_records_from_disk(&self) -> Result<Vec<FireRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EngineError::Ledger(format!(
                    "failed to read fire ledger: {e}"
                )));
            }
        };

        let mut records = Vec::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<FireRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        "ignoring malformed fire ledger line in {}: {e}",
                        self.path.display()
                    );
                }
            }
        }
        Ok(records)
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn acquire_write_guard(&self, timeout: Duration) -> Result<LedgerLockGuard> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Ledger(format!("failed to create ledger lock directory: {e}"))
            })?;
        }

        let started = std::time::Instant::now();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let stamp = now_epoch_millis().to_string();
                    let _ = file.write_all(stamp.as_bytes());
                    return Ok(LedgerLockGuard { path: lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    evict_stale_lock(&lock_path);
                    if started.elapsed() > timeout {
                        return Err(EngineError::Ledger(format!(
                            "timed out waiting for fire ledger lock {}",
                            lock_path.display()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(e) => {
                    return Err(EngineError::Ledger(format!(
                        "failed to create fire ledger lock {}: {e}",
                        lock_path.display()
                    )));
                }
            }
        }
    }
}

fn evict_stale_lock(lock_path: &PathBuf) {
    let Ok(metadata) = std::fs::metadata(lock_path) else {
        return;
    };
    let Ok(modified) = metadata.modified() else {
        return;
    };
    let Ok(age) = SystemTime::now().duration_since(modified) else {
        return;
    };
    if age > Duration::from_secs(30) {
        let _ = std::fs::remove_file(lock_path);
    }
}

struct LedgerLockGuard {
    path: PathBuf,
}

impl Drop for LedgerLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    match SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}
