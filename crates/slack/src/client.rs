use async_trait::async_trait;
use thiserror::Error;

use musicof_core::domain::{BotIdentity, Channel, ChannelId, Participant, UserId};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("slack api request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("slack rejected `{method}`: {code}")]
    Rejected { method: &'static str, code: String },
    #[error("slack response for `{method}` is missing `{field}`")]
    MalformedResponse { method: &'static str, field: &'static str },
}

/// Delivery knobs for `chat.postMessage`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PostOptions {
    /// Linkify `@name` mentions so the nominee actually gets pinged.
    pub link_names: bool,
}

/// The slice of Slack the game needs. Kept narrow so tests can script it.
#[async_trait]
pub trait SlackClient: Send + Sync {
    fn identity(&self) -> &BotIdentity;

    async fn channel_info(&self, channel: &ChannelId) -> Result<Channel, ApiError>;

    async fn conversation_members(&self, channel: &ChannelId) -> Result<Vec<UserId>, ApiError>;

    async fn user_info(&self, user: &UserId) -> Result<Participant, ApiError>;

    async fn post_message(
        &self,
        channel: &ChannelId,
        text: &str,
        options: PostOptions,
    ) -> Result<(), ApiError>;

    /// Tears down the live connection. Safe to call once per client.
    async fn disconnect(&self) -> Result<(), ApiError>;
}
