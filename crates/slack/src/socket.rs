use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use musicof_core::domain::{BotIdentity, Channel, ChannelId, Participant, UserId};

use crate::client::{ApiError, PostOptions, SlackClient};
use crate::events::{MessageEvent, SlackEvent, TransportError};
use crate::web::WebApiClient;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 250, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Opens and maintains the Socket Mode connection on a background task.
///
/// The worker reconnects forever with capped backoff; it only exits when the
/// handle is cancelled or the event receiver goes away.
pub struct SocketConnector {
    web: Arc<WebApiClient>,
    app_token: SecretString,
    policy: ReconnectPolicy,
}

impl SocketConnector {
    pub fn new(web: Arc<WebApiClient>, app_token: SecretString, policy: ReconnectPolicy) -> Self {
        Self { web, app_token, policy }
    }

    pub fn open(self) -> (mpsc::UnboundedReceiver<SlackEvent>, SocketHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_connection(
            self.web,
            self.app_token,
            self.policy,
            events_tx,
            cancel.clone(),
        ));
        (events_rx, SocketHandle { cancel, worker: Mutex::new(Some(worker)) })
    }
}

/// Cancellation handle for the connection worker.
pub struct SocketHandle {
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SocketHandle {
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

/// Production [`SlackClient`]: Web API calls plus the live socket lifecycle.
pub struct SocketClient {
    web: Arc<WebApiClient>,
    identity: BotIdentity,
    socket: SocketHandle,
}

impl SocketClient {
    pub fn new(web: Arc<WebApiClient>, identity: BotIdentity, socket: SocketHandle) -> Self {
        Self { web, identity, socket }
    }
}

#[async_trait]
impl SlackClient for SocketClient {
    fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    async fn channel_info(&self, channel: &ChannelId) -> Result<Channel, ApiError> {
        self.web.channel_info(channel).await
    }

    async fn conversation_members(&self, channel: &ChannelId) -> Result<Vec<UserId>, ApiError> {
        self.web.conversation_members(channel).await
    }

    async fn user_info(&self, user: &UserId) -> Result<Participant, ApiError> {
        self.web.user_info(user).await
    }

    async fn post_message(
        &self,
        channel: &ChannelId,
        text: &str,
        options: PostOptions,
    ) -> Result<(), ApiError> {
        self.web.post_message(channel, text, options).await
    }

    async fn disconnect(&self) -> Result<(), ApiError> {
        self.socket.shutdown().await;
        Ok(())
    }
}

enum SessionEnd {
    Cancelled,
    Refresh,
}

async fn run_connection(
    web: Arc<WebApiClient>,
    app_token: SecretString,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<SlackEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        if events.send(SlackEvent::Connecting { attempt }).is_err() {
            return;
        }

        match run_session(&web, &app_token, &events, &cancel).await {
            Ok(SessionEnd::Cancelled) => return,
            Ok(SessionEnd::Refresh) => {
                // Slack rotates connections with a disconnect frame; a fresh
                // dial is expected immediately, without backoff.
                debug!("connection refresh requested");
                attempt = 0;
                continue;
            }
            Err(event) => {
                if events.send(event).is_err() {
                    return;
                }
            }
        }

        let delay = policy.backoff(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session(
    web: &WebApiClient,
    app_token: &SecretString,
    events: &mpsc::UnboundedSender<SlackEvent>,
    cancel: &CancellationToken,
) -> Result<SessionEnd, SlackEvent> {
    let url = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        opened = web.connections_open(app_token) => match opened {
            Ok(url) => url,
            Err(ApiError::Rejected { code, .. }) if is_auth_failure(&code) => {
                return Err(SlackEvent::InvalidAuth);
            }
            Err(error) => {
                return Err(SlackEvent::ConnectionError(TransportError::Connect(
                    error.to_string(),
                )));
            }
        },
    };

    let (mut stream, _response) = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        connected = connect_async(url.as_str()) => connected.map_err(|error| {
            SlackEvent::ConnectionError(TransportError::Connect(error.to_string()))
        })?,
    };

    if events.send(SlackEvent::Connected).is_err() {
        return Ok(SessionEnd::Cancelled);
    }
    debug!("socket mode connection established");

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            frame = stream.next() => frame,
        };

        let message = match frame {
            None => {
                return Err(SlackEvent::ConnectionError(TransportError::Receive(
                    "stream ended".to_string(),
                )));
            }
            Some(Err(error)) => {
                return Err(SlackEvent::ConnectionError(TransportError::Receive(
                    error.to_string(),
                )));
            }
            Some(Ok(message)) => message,
        };

        match message {
            WsMessage::Text(raw) => match interpret_frame(&raw) {
                FrameOutcome::Reconnect => return Ok(SessionEnd::Refresh),
                FrameOutcome::Continue { ack, event } => {
                    if let Some(envelope_id) = ack {
                        let body = serde_json::json!({ "envelope_id": envelope_id }).to_string();
                        if let Err(error) = stream.send(WsMessage::Text(body)).await {
                            return Err(SlackEvent::ConnectionError(TransportError::Receive(
                                error.to_string(),
                            )));
                        }
                    }
                    if let Some(event) = event {
                        if events.send(event).is_err() {
                            return Ok(SessionEnd::Cancelled);
                        }
                    }
                }
            },
            WsMessage::Ping(payload) => {
                if let Err(error) = stream.send(WsMessage::Pong(payload)).await {
                    return Err(SlackEvent::ConnectionError(TransportError::Receive(
                        error.to_string(),
                    )));
                }
            }
            WsMessage::Close(_) => {
                return Err(SlackEvent::ConnectionError(TransportError::Receive(
                    "server closed the connection".to_string(),
                )));
            }
            _ => {}
        }
    }
}

fn is_auth_failure(code: &str) -> bool {
    matches!(
        code,
        "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked" | "token_expired"
    )
}

#[derive(Debug, PartialEq, Eq)]
enum FrameOutcome {
    Continue { ack: Option<String>, event: Option<SlackEvent> },
    Reconnect,
}

/// Maps a raw Socket Mode frame to an ack requirement and a game event.
///
/// Unknown frames are still acked when they carry an envelope id, otherwise
/// Slack keeps redelivering them.
fn interpret_frame(raw: &str) -> FrameOutcome {
    let Ok(frame) = serde_json::from_str::<SocketFrame>(raw) else {
        return FrameOutcome::Continue {
            ack: None,
            event: Some(SlackEvent::Other { kind: "unparsed".to_string() }),
        };
    };

    match frame.kind.as_deref() {
        Some("hello") => FrameOutcome::Continue { ack: None, event: Some(SlackEvent::Hello) },
        Some("disconnect") => FrameOutcome::Reconnect,
        Some("events_api") => FrameOutcome::Continue {
            ack: frame.envelope_id,
            event: Some(events_api_event(frame.payload)),
        },
        Some(other) => FrameOutcome::Continue {
            ack: frame.envelope_id,
            event: Some(SlackEvent::Other { kind: other.to_string() }),
        },
        None => FrameOutcome::Continue {
            ack: frame.envelope_id,
            event: Some(SlackEvent::Other { kind: "untyped".to_string() }),
        },
    }
}

fn events_api_event(payload: Option<EventsPayload>) -> SlackEvent {
    let Some(inner) = payload.and_then(|payload| payload.event) else {
        return SlackEvent::Other { kind: "events_api".to_string() };
    };

    match inner.kind.as_deref() {
        Some("message") => message_event(inner),
        Some(other) => SlackEvent::Other { kind: other.to_string() },
        None => SlackEvent::Other { kind: "events_api".to_string() },
    }
}

fn message_event(inner: InnerEvent) -> SlackEvent {
    // Plain messages and bot messages reach the game; edits, joins and the
    // rest of the subtype zoo do not.
    match inner.subtype.as_deref() {
        None | Some("bot_message") => {}
        Some(subtype) => return SlackEvent::Other { kind: format!("message.{subtype}") },
    }

    let (Some(channel), Some(text)) = (inner.channel, inner.text) else {
        return SlackEvent::Other { kind: "message.partial".to_string() };
    };

    SlackEvent::Message(MessageEvent {
        channel: ChannelId(channel),
        user: UserId(inner.user.unwrap_or_default()),
        bot_id: inner.bot_id,
        text,
    })
}

#[derive(Debug, Default, Deserialize)]
struct SocketFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<EventsPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct EventsPayload {
    #[serde(default)]
    event: Option<InnerEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct InnerEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
}
