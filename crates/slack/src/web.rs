use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use musicof_core::domain::{BotIdentity, Channel, ChannelId, Participant, UserId};

use crate::client::{ApiError, PostOptions};

const SLACK_API_BASE: &str = "https://slack.com/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MEMBERS_PAGE_LIMIT: &str = "200";

/// Thin client over the Slack Web API methods the game uses.
///
/// Every call authenticates with the bot token except
/// [`connections_open`](Self::connections_open), which Slack requires to use
/// the app-level token.
pub struct WebApiClient {
    http: Client,
    bot_token: SecretString,
}

impl WebApiClient {
    pub fn new(bot_token: SecretString) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, bot_token })
    }

    pub async fn auth_test(&self) -> Result<BotIdentity, ApiError> {
        let envelope: Envelope<AuthTestPayload> = self.get_json("auth.test", &[]).await?;
        identity_from(accept("auth.test", envelope)?)
    }

    pub async fn channel_info(&self, channel: &ChannelId) -> Result<Channel, ApiError> {
        let query = [("channel", channel.0.clone())];
        let envelope: Envelope<ConversationInfoPayload> =
            self.get_json("conversations.info", &query).await?;
        channel_from(accept("conversations.info", envelope)?)
    }

    pub async fn conversation_members(&self, channel: &ChannelId) -> Result<Vec<UserId>, ApiError> {
        let mut members = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut query =
                vec![("channel", channel.0.clone()), ("limit", MEMBERS_PAGE_LIMIT.to_string())];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }

            let envelope: Envelope<MembersPayload> =
                self.get_json("conversations.members", &query).await?;
            let payload = accept("conversations.members", envelope)?;
            let page = payload.members.ok_or(ApiError::MalformedResponse {
                method: "conversations.members",
                field: "members",
            })?;
            members.extend(page.into_iter().map(UserId));

            cursor = payload
                .response_metadata
                .and_then(|metadata| metadata.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                return Ok(members);
            }
        }
    }

    pub async fn user_info(&self, user: &UserId) -> Result<Participant, ApiError> {
        let query = [("user", user.0.clone())];
        let envelope: Envelope<UserInfoPayload> = self.get_json("users.info", &query).await?;
        participant_from(accept("users.info", envelope)?)
    }

    pub async fn post_message(
        &self,
        channel: &ChannelId,
        text: &str,
        options: PostOptions,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "channel": channel.0,
            "text": text,
            "link_names": options.link_names,
        });
        let envelope: Envelope<EmptyPayload> = self.post_json("chat.postMessage", &body).await?;
        accept("chat.postMessage", envelope)?;
        Ok(())
    }

    /// Requests a fresh Socket Mode WebSocket URL.
    pub async fn connections_open(&self, app_token: &SecretString) -> Result<String, ApiError> {
        let response = self
            .http
            .post(format!("{SLACK_API_BASE}/apps.connections.open"))
            .bearer_auth(app_token.expose_secret())
            .send()
            .await?
            .error_for_status()?;
        let envelope: Envelope<ConnectionsOpenPayload> = response.json().await?;
        let payload = accept("apps.connections.open", envelope)?;
        payload
            .url
            .ok_or(ApiError::MalformedResponse { method: "apps.connections.open", field: "url" })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        query: &[(&str, String)],
    ) -> Result<Envelope<T>, ApiError> {
        let response = self
            .http
            .get(format!("{SLACK_API_BASE}/{method}"))
            .bearer_auth(self.bot_token.expose_secret())
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &serde_json::Value,
    ) -> Result<Envelope<T>, ApiError> {
        let response = self
            .http
            .post(format!("{SLACK_API_BASE}/{method}"))
            .bearer_auth(self.bot_token.expose_secret())
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Slack's uniform response wrapper. Payload fields are all optional so that
/// `ok: false` bodies still decode before being rejected.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    payload: T,
}

fn accept<T>(method: &'static str, envelope: Envelope<T>) -> Result<T, ApiError> {
    if envelope.ok {
        Ok(envelope.payload)
    } else {
        Err(ApiError::Rejected {
            method,
            code: envelope.error.unwrap_or_else(|| "unknown_error".to_string()),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthTestPayload {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

fn identity_from(payload: AuthTestPayload) -> Result<BotIdentity, ApiError> {
    let user_id = payload
        .user_id
        .ok_or(ApiError::MalformedResponse { method: "auth.test", field: "user_id" })?;
    let name = payload.user.unwrap_or_else(|| user_id.clone());
    Ok(BotIdentity { user_id: UserId(user_id), name })
}

#[derive(Debug, Default, Deserialize)]
struct ConversationInfoPayload {
    #[serde(default)]
    channel: Option<ConversationObject>,
}

#[derive(Debug, Deserialize)]
struct ConversationObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

fn channel_from(payload: ConversationInfoPayload) -> Result<Channel, ApiError> {
    let conversation = payload
        .channel
        .ok_or(ApiError::MalformedResponse { method: "conversations.info", field: "channel" })?;
    let ConversationObject { id, name } = conversation;
    // Direct messages have no name; fall back to the id for logs.
    let name = name.filter(|name| !name.is_empty()).unwrap_or_else(|| id.clone());
    Ok(Channel { id: ChannelId(id), name })
}

#[derive(Debug, Default, Deserialize)]
struct MembersPayload {
    #[serde(default)]
    members: Option<Vec<String>>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UserInfoPayload {
    #[serde(default)]
    user: Option<UserObject>,
}

#[derive(Debug, Deserialize)]
struct UserObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

fn participant_from(payload: UserInfoPayload) -> Result<Participant, ApiError> {
    let user =
        payload.user.ok_or(ApiError::MalformedResponse { method: "users.info", field: "user" })?;
    let UserObject { id, name } = user;
    let name = name.filter(|name| !name.is_empty()).unwrap_or_else(|| id.clone());
    Ok(Participant { id: UserId(id), name })
}

#[derive(Debug, Default, Deserialize)]
struct ConnectionsOpenPayload {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EmptyPayload {}
