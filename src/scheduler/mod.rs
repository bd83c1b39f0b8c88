//! Generic job scheduler.
//!
//! Jobs pair a [`Schedule`] with a [`JobPayload`]; the scheduler persists
//! them, recovers them at startup and dispatches fires to one handler per
//! payload kind.

pub mod bridge;
pub mod compute;
pub mod runner;
pub mod types;

pub use bridge::{ReminderJobHandler, SystemTick, TickForwarder};
pub use compute::{compute_next_run_at, is_repeating_schedule};
pub use runner::{JobHandler, Scheduler};
pub use types::{JobPayload, NewJob, PayloadKind, Schedule, ScheduledJob};
