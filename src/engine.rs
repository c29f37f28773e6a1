//! Trigger dispatcher and tick driver.
//!
//! One evaluation pass per tick over all active reminders, refreshed
//! from the source each time. The fire ledger claim is the only shared
//! mutation and the authoritative answer to "should this occurrence
//! ever fire". Everything after a successful claim — durable store
//! write, live bus publish, external delivery — is independently
//! best-effort: failures are logged and never retract the claim.

use crate::bus::NotificationBus;
use crate::clock::OrgTimezone;
use crate::ledger::FireLedger;
use crate::recurrence;
use crate::reminder::{Reminder, ReminderEvent};
use crate::sink::{DeliverySink, NullSink};
use crate::store::{NotificationStore, ReminderSource};
use chrono::{DateTime, FixedOffset, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Default seconds between ticks. At most the matching granularity of
/// one minute, so each due minute is visited under continuous
/// operation.
pub const DEFAULT_TICK_SECS: u64 = 60;

/// Scheduling engine: evaluates reminders each tick and dispatches
/// matched occurrences.
pub struct Engine {
    clock: OrgTimezone,
    tick: Duration,
    retention_days: u32,
    source: Arc<dyn ReminderSource>,
    store: Arc<dyn NotificationStore>,
    bus: Arc<dyn NotificationBus>,
    sink: Arc<dyn DeliverySink>,
    ledger: FireLedger,
    last_prune_day: Option<NaiveDate>,
}

/// Handle to a running engine loop.
pub struct EngineHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl EngineHandle {
    /// Request loop shutdown. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

impl Engine {
    /// Create an engine over the given collaborators, with the default
    /// tick interval, retention window, and no external delivery.
    pub fn new(
        clock: OrgTimezone,
        source: Arc<dyn ReminderSource>,
        store: Arc<dyn NotificationStore>,
        bus: Arc<dyn NotificationBus>,
        ledger: FireLedger,
    ) -> Self {
        Self {
            clock,
            tick: Duration::from_secs(DEFAULT_TICK_SECS),
            retention_days: 400,
            source,
            store,
            bus,
            sink: Arc::new(NullSink),
            ledger,
            last_prune_day: None,
        }
    }

    /// Override the tick interval.
    #[must_use]
    pub fn with_tick_secs(mut self, secs: u64) -> Self {
        self.tick = Duration::from_secs(secs.clamp(1, 60));
        self
    }

    /// Override the ledger retention window.
    #[must_use]
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Attach an external delivery sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Start the tick loop.
    pub fn run(mut self) -> EngineHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            info!("engine started; tick every {:?}", self.tick);
            let mut interval = tokio::time::interval(self.tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = self.clock.now_minute();
                        self.tick_at(now).await;
                    }
                    _ = &mut stop_rx => {
                        info!("engine stopped");
                        break;
                    }
                }
            }
        });
        EngineHandle {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// One evaluation pass at the given minute.
    ///
    /// Public so tests can drive the dispatcher with a synthetic
    /// clock; the tick loop calls it with the real one.
    pub async fn tick_at(&mut self, now: DateTime<FixedOffset>) {
        let reminders = match self.source.load_active() {
            Ok(reminders) => reminders,
            Err(e) => {
                warn!("cannot load reminders, skipping tick: {e}");
                return;
            }
        };
        debug!(count = reminders.len(), minute = %now, "evaluating reminders");

        for reminder in &reminders {
            self.dispatch_if_due(reminder, now).await;
        }

        self.prune_once_per_day(now.date_naive());
    }

    async fn dispatch_if_due(&mut self, reminder: &Reminder, now: DateTime<FixedOffset>) {
        let Some(fired_on) = recurrence::fires_at(reminder, now) else {
            return;
        };

        match self.ledger.try_claim(reminder.id, fired_on) {
            Ok(true) => {}
            Ok(false) => {
                // Lost the claim race — a duplicate tick in the same
                // minute or a peer instance got here first. Benign.
                debug!(reminder = reminder.id, %fired_on, "occurrence already claimed");
                return;
            }
            Err(e) => {
                warn!("ledger claim failed for reminder {}: {e}", reminder.id);
                return;
            }
        }

        info!(
            reminder = reminder.id,
            owner = %reminder.owner,
            %fired_on,
            "reminder fired"
        );
        let event = ReminderEvent {
            reminder_id: reminder.id,
            title: reminder.title.clone(),
            message: reminder.message.clone(),
            tipe: reminder.kind.label().to_owned(),
            scheduled_at: now.to_rfc3339(),
        };

        // Durable record first: it is what offline recipients read
        // later. At-least-once intent, soft on failure.
        if let Err(e) = self.store.record(reminder.owner, &event) {
            warn!(
                "cannot record notification for reminder {}: {e}",
                reminder.id
            );
        }

        let delivered = self.bus.publish(reminder.owner, event.clone());
        debug!(delivered, "published live notification");

        // External delivery rides its own task so a slow gateway can
        // never stall the tick.
        let sink = Arc::clone(&self.sink);
        let owner = reminder.owner;
        let text = event.render_text();
        tokio::spawn(async move {
            if let Err(e) = sink.deliver(owner, &text).await {
                warn!("{} delivery failed for owner {owner}: {e}", sink.id());
            }
        });
    }

    fn prune_once_per_day(&mut self, today: NaiveDate) {
        if self.last_prune_day == Some(today) {
            return;
        }
        self.last_prune_day = Some(today);
        match self.ledger.prune(self.retention_days, today) {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "pruned fire ledger"),
            Err(e) => warn!("fire ledger prune failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::bus::{BusMessage, InMemoryBus};
    use crate::error::{EngineError, Result};
    use crate::reminder::{OwnerId, ReminderKind, TimeOfDay};
    use crate::store::SqliteStore;
    use chrono::TimeZone;

    struct FixedSource(Vec<Reminder>);

    impl ReminderSource for FixedSource {
        fn load_active(&self) -> Result<Vec<Reminder>> {
            Ok(self.0.iter().filter(|r| r.active).cloned().collect())
        }
    }

    struct FailingStore;

    impl NotificationStore for FailingStore {
        fn record(&self, _owner: OwnerId, _event: &ReminderEvent) -> Result<()> {
            Err(EngineError::Store("disk full".to_owned()))
        }
    }

    fn daily_reminder(id: i64) -> Reminder {
        Reminder {
            id,
            owner: OwnerId(42),
            title: "Laporan".to_owned(),
            message: "Kirim laporan".to_owned(),
            kind: ReminderKind::Daily,
            time: TimeOfDay::parse("08:00").unwrap(),
            active: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn monday_0800() -> DateTime<FixedOffset> {
        chrono::FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
            .unwrap()
    }

    fn make_engine(
        source: Arc<dyn ReminderSource>,
        store: Arc<dyn NotificationStore>,
        ledger_dir: &std::path::Path,
    ) -> (Engine, Arc<InMemoryBus>) {
        let bus = Arc::new(InMemoryBus::default());
        let clock = OrgTimezone::parse("+07:00").unwrap();
        let ledger = FireLedger::new(ledger_dir.join("fires.jsonl"));
        let engine = Engine::new(clock, source, store, Arc::clone(&bus) as _, ledger);
        (engine, bus)
    }

    #[tokio::test]
    async fn duplicate_ticks_in_one_minute_fire_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = Arc::new(FixedSource(vec![daily_reminder(1)]));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (mut engine, bus) = make_engine(source, store, temp.path());

        let mut sub = bus.subscribe(OwnerId(42));
        engine.tick_at(monday_0800()).await;
        engine.tick_at(monday_0800()).await;

        match sub.next_message().await {
            BusMessage::Payload(payload) => assert_eq!(payload.reminder_id, 1),
            other => panic!("expected payload, got {other:?}"),
        }
        let second =
            tokio::time::timeout(Duration::from_millis(50), sub.next_message()).await;
        assert!(second.is_err(), "second tick must not fire again");
    }

    #[tokio::test]
    async fn deactivated_reminder_does_not_fire() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut reminder = daily_reminder(1);
        reminder.active = false;
        let source = Arc::new(FixedSource(vec![reminder]));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (mut engine, bus) = make_engine(source, store, temp.path());

        let mut sub = bus.subscribe(OwnerId(42));
        engine.tick_at(monday_0800()).await;

        let observed =
            tokio::time::timeout(Duration::from_millis(50), sub.next_message()).await;
        assert!(observed.is_err());
    }

    #[tokio::test]
    async fn store_failure_does_not_retract_the_claim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = Arc::new(FixedSource(vec![daily_reminder(1)]));
        let (mut engine, bus) = make_engine(source, Arc::new(FailingStore), temp.path());

        let mut sub = bus.subscribe(OwnerId(42));
        engine.tick_at(monday_0800()).await;

        // The live publish still happened despite the store failure.
        assert!(matches!(sub.next_message().await, BusMessage::Payload(_)));

        // And the claim stands: a later tick in the same minute does
        // not re-fire.
        engine.tick_at(monday_0800()).await;
        let second =
            tokio::time::timeout(Duration::from_millis(50), sub.next_message()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn durable_record_is_written_on_fire() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = Arc::new(FixedSource(vec![daily_reminder(1)]));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (mut engine, _bus) =
            make_engine(source, Arc::clone(&store) as _, temp.path());

        engine.tick_at(monday_0800()).await;

        let recorded = store.notifications_for(OwnerId(42), 10).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].reminder_id, 1);
        assert_eq!(recorded[0].tipe, "Harian");
        assert!(recorded[0].scheduled_at.contains("+07:00"));
    }

    #[tokio::test]
    async fn run_loop_stops_on_request() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = Arc::new(FixedSource(Vec::new()));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (engine, _bus) = make_engine(source, store, temp.path());

        let mut handle = engine.with_tick_secs(1).run();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("engine loop should stop promptly");
    }
}
