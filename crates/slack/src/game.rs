use thiserror::Error;
use tracing::info;

use musicof_core::domain::{ChannelId, UserId};
use musicof_core::random::Picker;

use crate::client::{ApiError, PostOptions, SlackClient};
use crate::events::MessageEvent;

/// The magic word. Anything containing it alongside a bot mention counts.
pub const NOMINATE_KEYWORD: &str = "nominate";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Nominate { caller: UserId },
    Ignore,
}

#[derive(Debug, Error)]
pub enum GameError {
    #[error("nobody is eligible for nomination in this channel")]
    NoEligibleParticipant,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Decides whether a message is a nomination request.
///
/// Filters are ordered cheapest first and all must pass: the game channel,
/// a human author, a mention of the bot's user id, the keyword.
pub fn resolve(message: &MessageEvent, channel: &ChannelId, bot: &UserId) -> Action {
    if message.channel != *channel {
        return Action::Ignore;
    }
    if message.bot_id.as_deref().is_some_and(|id| !id.is_empty()) {
        return Action::Ignore;
    }
    if !message.text.contains(&bot.0) {
        return Action::Ignore;
    }
    if !message.text.contains(NOMINATE_KEYWORD) {
        return Action::Ignore;
    }

    Action::Nominate { caller: message.user.clone() }
}

/// Picks a random channel member, excluding the bot and the caller, and
/// announces them with a linkified mention.
pub async fn nominate(
    client: &dyn SlackClient,
    channel: &ChannelId,
    caller: &UserId,
    picker: &mut dyn Picker,
) -> Result<(), GameError> {
    let bot = client.identity().user_id.clone();

    let mut pool = client.conversation_members(channel).await?;
    pool.retain(|member| *member != bot && member != caller);

    if pool.is_empty() {
        return Err(GameError::NoEligibleParticipant);
    }

    let winner = pool[picker.pick(pool.len())].clone();
    let nominee = client.user_info(&winner).await?;
    info!(nominee = %nominee.id, channel = %channel, "nominating");

    client
        .post_message(channel, &format!("@{}", nominee.name), PostOptions { link_names: true })
        .await?;
    Ok(())
}
