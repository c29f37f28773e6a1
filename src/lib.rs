//! Ingat: reminder scheduling and live delivery engine.
//!
//! Turns declarative reminder definitions (owner, cadence, time of
//! day, day set or specific date, active flag) into exactly one
//! trigger event per scheduled occurrence, and pushes that event live
//! to every connected client session.
//!
//! # Architecture
//!
//! A single tick loop drives independent stages:
//! - **Recurrence evaluation**: pure cadence matching at minute
//!   granularity in one fixed org timezone
//! - **Fire ledger**: file-backed exactly-once claims per occurrence,
//!   surviving restarts and duplicate ticks
//! - **Dispatch**: durable notification record, live bus publish,
//!   external WhatsApp delivery — each best-effort after the claim
//! - **Notification bus**: per-owner fan-out with small bounded
//!   buffers that drop oldest on overflow
//! - **Gateway**: one SSE stream per owner with keepalives and soft
//!   `notify-error` reporting
//! - **Client**: auto-reconnecting stream consumer with fixed backoff

pub mod bus;
pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod recurrence;
pub mod reminder;
pub mod sink;
pub mod sse;
pub mod store;

pub use bus::{InMemoryBus, NotificationBus};
pub use clock::OrgTimezone;
pub use config::EngineConfig;
pub use engine::{Engine, EngineHandle};
pub use error::{EngineError, Result};
pub use ledger::FireLedger;
pub use reminder::{OwnerId, Reminder, ReminderEvent, ReminderKind};
pub use store::SqliteStore;
