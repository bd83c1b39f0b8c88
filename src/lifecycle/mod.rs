//! Agent presence lifecycle.
//!
//! A pure [`reducer`] over [`types`], driven by the [`controller`] and
//! served from a single task by the [`runtime`].

pub mod controller;
pub mod reducer;
pub mod runtime;
pub mod types;
pub mod window;

pub use controller::{LifecycleController, OutputHandler, TracingOutputHandler};
pub use reducer::reduce;
pub use runtime::{LifecycleClient, LifecycleServer, lifecycle_channel};
pub use types::{
    AgentMode, ChannelId, LifeEvent, LifeOutput, LifeState, MessageId, ReduceResult, UnreadDetail,
    UnreadSummaryWithDetails, UserId,
};
pub use window::{ClockTime, SleepWindow};
