use thiserror::Error;

use musicof_core::domain::{ChannelId, UserId};

/// Connection-stream failures, carried inside events so the game loop can
/// both log them and hand the most recent one back from `Bot::stop`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
}

/// Everything the connection worker can hand to the game loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Connecting { attempt: u32 },
    ConnectionError(TransportError),
    InvalidAuth,
    Hello,
    Connected,
    Message(MessageEvent),
    Other { kind: String },
}

impl SlackEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::ConnectionError(_) => "connection_error",
            Self::InvalidAuth => "invalid_auth",
            Self::Hello => "hello",
            Self::Connected => "connected",
            Self::Message(_) => "message",
            Self::Other { .. } => "other",
        }
    }
}

/// A channel message as the game sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel: ChannelId,
    /// Empty for messages authored by integrations rather than people.
    pub user: UserId,
    /// Set when the author is a bot integration.
    pub bot_id: Option<String>,
    pub text: String,
}
