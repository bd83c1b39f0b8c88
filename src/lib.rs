//! Presence: lifecycle and scheduling core for an autonomous chat agent.
//!
//! The agent is either off, awake but idle, or watching one focus channel.
//! A pure reducer decides every transition; a controller applies its
//! outputs, persists state to SQLite and keeps three standing system jobs
//! (activity digests, random promotion, sleep-window checks) in step with
//! the current mode. A generic persistent scheduler drives those jobs and
//! user reminders, and an unread ledger tracks what the agent has missed.
//!
//! # Architecture
//!
//! - **lifecycle**: state types, reducer, controller and mailbox runtime
//! - **scheduler**: schedule algebra, job store bookkeeping, timers
//! - **unread**: per-message unread ledger and read positions
//! - **storage**: the persistence port and its SQLite implementation

pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod scheduler;
pub mod storage;
pub mod unread;

pub use clock::{Clock, SystemClock};
pub use config::PresenceConfig;
pub use error::{PresenceError, Result};
pub use lifecycle::{
    AgentMode, LifeState, LifecycleClient, LifecycleController, OutputHandler, lifecycle_channel,
};
pub use scheduler::{Schedule, ScheduledJob, Scheduler};
pub use storage::{Persistence, SqliteStore};
pub use unread::UnreadTracker;
