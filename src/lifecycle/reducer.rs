//! Pure lifecycle reducer.
//!
//! `(LifeState, LifeEvent) -> (LifeState, Vec<LifeOutput>)` with no side
//! effects. Any event whose guard does not match the current state returns
//! the state unchanged and no outputs.

use crate::lifecycle::types::{AgentMode, LifeEvent, LifeOutput, LifeState, ReduceResult};

/// Compute the next state and the outputs for `event`.
#[must_use]
pub fn reduce(state: &LifeState, event: &LifeEvent) -> ReduceResult {
    match event {
        LifeEvent::Wake => match state.mode {
            AgentMode::Off => ReduceResult {
                state: LifeState::awake_not_watching(),
                outputs: Vec::new(),
            },
            _ => ReduceResult::unchanged(state),
        },

        LifeEvent::Sleep => match state.mode {
            AgentMode::AwakeNotWatching => ReduceResult {
                state: LifeState::off(),
                outputs: Vec::new(),
            },
            _ => ReduceResult::unchanged(state),
        },

        LifeEvent::DiscordMessage {
            channel_id,
            message_id,
            is_mention_or_reply: true,
            ..
        } => {
            let focus = LifeOutput::FocusMessage {
                channel_id: channel_id.clone(),
                message_id: message_id.clone(),
            };
            if state.mode == AgentMode::AwakeWatching {
                // Mentions always pull focus, even onto the current channel.
                ReduceResult {
                    state: LifeState::watching(channel_id.clone()),
                    outputs: vec![focus],
                }
            } else {
                ReduceResult {
                    state: LifeState::watching(channel_id.clone()),
                    outputs: vec![
                        LifeOutput::WatchingStarted {
                            focus_channel_id: channel_id.clone(),
                        },
                        focus,
                    ],
                }
            }
        }

        LifeEvent::DiscordMessage {
            channel_id,
            message_id,
            is_mention_or_reply: false,
            ..
        } => {
            if state.is_focus(channel_id) {
                ReduceResult {
                    state: state.clone(),
                    outputs: vec![LifeOutput::FocusMessage {
                        channel_id: channel_id.clone(),
                        message_id: message_id.clone(),
                    }],
                }
            } else {
                ReduceResult::unchanged(state)
            }
        }

        LifeEvent::PromoteToWatching { focus_channel_id } => match state.mode {
            AgentMode::AwakeNotWatching => ReduceResult {
                state: LifeState::watching(focus_channel_id.clone()),
                outputs: vec![LifeOutput::WatchingStarted {
                    focus_channel_id: focus_channel_id.clone(),
                }],
            },
            _ => ReduceResult::unchanged(state),
        },

        LifeEvent::SetNotWatching => match state.mode {
            AgentMode::AwakeWatching => ReduceResult {
                state: LifeState::awake_not_watching(),
                outputs: vec![LifeOutput::WatchingEnded],
            },
            _ => ReduceResult::unchanged(state),
        },

        LifeEvent::SetFocusChannel { channel_id } => match state.mode {
            AgentMode::AwakeWatching => ReduceResult {
                state: LifeState::watching(channel_id.clone()),
                outputs: Vec::new(),
            },
            _ => ReduceResult::unchanged(state),
        },

        LifeEvent::ActivityTick {
            window_start,
            window_end,
            summary,
        } => match state.mode {
            AgentMode::AwakeWatching => ReduceResult {
                state: state.clone(),
                outputs: vec![LifeOutput::ActivityDigest {
                    window_start: *window_start,
                    window_end: *window_end,
                    summary: summary.clone(),
                }],
            },
            _ => ReduceResult::unchanged(state),
        },
    }
}
