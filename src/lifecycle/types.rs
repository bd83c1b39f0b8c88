//! Lifecycle state, events and outputs.
//!
//! The reducer owns every transition between these types; the controller
//! only feeds it [`LifeEvent`]s and applies the resulting [`LifeOutput`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id!(
    /// Chat channel identifier.
    ChannelId
);
string_id!(
    /// Chat message identifier.
    MessageId
);
string_id!(
    /// Message author identifier.
    UserId
);

/// How present the agent currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMode {
    /// Dormant. Only a mention or reply wakes the agent.
    Off,
    /// Awake but not following any channel; may be promoted at random.
    AwakeNotWatching,
    /// Actively following one focus channel.
    AwakeWatching,
}

impl AgentMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::AwakeNotWatching => "AWAKE_NOT_WATCHING",
            Self::AwakeWatching => "AWAKE_WATCHING",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OFF" => Some(Self::Off),
            "AWAKE_NOT_WATCHING" => Some(Self::AwakeNotWatching),
            "AWAKE_WATCHING" => Some(Self::AwakeWatching),
            _ => None,
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reducer-owned state.
///
/// Invariant: `focus_channel_id.is_some()` exactly when `mode` is
/// [`AgentMode::AwakeWatching`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifeState {
    pub mode: AgentMode,
    pub focus_channel_id: Option<ChannelId>,
}

impl LifeState {
    #[must_use]
    pub fn off() -> Self {
        Self {
            mode: AgentMode::Off,
            focus_channel_id: None,
        }
    }

    #[must_use]
    pub fn awake_not_watching() -> Self {
        Self {
            mode: AgentMode::AwakeNotWatching,
            focus_channel_id: None,
        }
    }

    #[must_use]
    pub fn watching(focus: ChannelId) -> Self {
        Self {
            mode: AgentMode::AwakeWatching,
            focus_channel_id: Some(focus),
        }
    }

    /// Whether the focus/mode invariant holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.focus_channel_id.is_some() == (self.mode == AgentMode::AwakeWatching)
    }

    /// True when watching and `channel_id` is the focus channel.
    #[must_use]
    pub fn is_focus(&self, channel_id: &ChannelId) -> bool {
        self.mode == AgentMode::AwakeWatching && self.focus_channel_id.as_ref() == Some(channel_id)
    }
}

impl Default for LifeState {
    fn default() -> Self {
        Self::off()
    }
}

/// One unread message as rendered in an activity digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadDetail {
    pub message_id: MessageId,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Per-channel unread activity inside a digest window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadSummaryWithDetails {
    pub channel_id: ChannelId,
    pub guild_id: String,
    pub unread_count: usize,
    /// Newest first.
    pub messages: Vec<UnreadDetail>,
}

/// Input to the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifeEvent {
    /// Leave sleep and start awake, not watching.
    Wake,
    /// Go to sleep. Deferred while watching.
    Sleep,
    /// A chat message arrived.
    DiscordMessage {
        /// Channel the message was posted in.
        channel_id: ChannelId,
        /// Id of the incoming message.
        message_id: MessageId,
        /// Sender of the message.
        author_id: UserId,
        /// Whether the message mentions or replies to the bot.
        is_mention_or_reply: bool,
    },
    /// Start watching a channel chosen by the promotion job.
    PromoteToWatching {
        /// Channel to focus on.
        focus_channel_id: ChannelId,
    },
    /// Stop watching and return to awake, not watching.
    SetNotWatching,
    /// Move the focus to another channel while watching.
    SetFocusChannel {
        /// New focus channel.
        channel_id: ChannelId,
    },
    /// Periodic unread digest for the window that just closed.
    ActivityTick {
        /// Start of the digest window.
        window_start: DateTime<Utc>,
        /// End of the digest window.
        window_end: DateTime<Utc>,
        /// Per-channel unread counts with recent messages.
        summary: Vec<UnreadSummaryWithDetails>,
    },
}

/// Side effect requested by the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifeOutput {
    /// Nothing to do.
    Noop,
    /// Watching began on a channel.
    WatchingStarted {
        /// Channel now in focus.
        focus_channel_id: ChannelId,
    },
    /// Watching stopped.
    WatchingEnded,
    /// A message arrived in the focus channel.
    FocusMessage {
        /// The focus channel.
        channel_id: ChannelId,
        /// Id of the message to forward.
        message_id: MessageId,
    },
    /// Deliver an unread digest to the agent.
    ActivityDigest {
        /// Start of the digest window.
        window_start: DateTime<Utc>,
        /// End of the digest window.
        window_end: DateTime<Utc>,
        /// Per-channel unread counts with recent messages.
        summary: Vec<UnreadSummaryWithDetails>,
    },
}

/// Reducer result: the next state plus the outputs to apply, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceResult {
    pub state: LifeState,
    pub outputs: Vec<LifeOutput>,
}

impl ReduceResult {
    pub(crate) fn unchanged(state: &LifeState) -> Self {
        Self {
            state: state.clone(),
            outputs: Vec::new(),
        }
    }
}
