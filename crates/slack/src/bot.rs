use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use musicof_core::config::AppConfig;
use musicof_core::domain::{Channel, ChannelId};
use musicof_core::random::{Picker, ThreadRngPicker};

use crate::client::{ApiError, PostOptions, SlackClient};
use crate::events::{MessageEvent, SlackEvent, TransportError};
use crate::game::{self, Action, GameError};
use crate::socket::{ReconnectPolicy, SocketClient, SocketConnector};
use crate::web::WebApiClient;

/// Failures that prevent the bot from starting at all.
///
/// Anything after a successful [`Bot::start`] is reported through the event
/// stream instead and never aborts the game.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("could not build the slack web client")]
    Client(#[source] ApiError),
    #[error("could not resolve the bot identity")]
    Identity(#[source] ApiError),
    #[error("could not resolve channel `{channel}`")]
    ChannelLookup { channel: ChannelId, #[source] source: ApiError },
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Connection(#[from] TransportError),
    #[error("slack rejected the bot credentials")]
    InvalidAuth,
    #[error(transparent)]
    Game(#[from] GameError),
    #[error("disconnecting from slack failed")]
    Disconnect(#[source] ApiError),
    #[error("the game loop is no longer running")]
    LoopClosed,
}

struct HaltRequest {
    done: oneshot::Sender<Option<BotError>>,
}

/// Handle to a running game. Dropping it shuts the loop down without a
/// result; [`stop`](Self::stop) shuts it down and reports the most recent
/// error the loop swallowed, if any.
pub struct Bot {
    halt: mpsc::Sender<HaltRequest>,
}

impl Bot {
    /// Resolves the bot identity and the game channel, opens the Socket Mode
    /// connection and spawns the game loop.
    pub async fn start(config: &AppConfig) -> Result<Self, StartError> {
        let web = Arc::new(
            WebApiClient::new(config.slack.bot_token.clone()).map_err(StartError::Client)?,
        );
        let identity = web.auth_test().await.map_err(StartError::Identity)?;
        let channel = web.channel_info(&config.slack.channel).await.map_err(|source| {
            StartError::ChannelLookup { channel: config.slack.channel.clone(), source }
        })?;
        info!(channel = %channel.name, bot = %identity.name, "starting the musicof game");

        let connector = SocketConnector::new(
            Arc::clone(&web),
            config.slack.app_token.clone(),
            ReconnectPolicy::default(),
        );
        let (events, socket) = connector.open();
        let client: Arc<dyn SlackClient> = Arc::new(SocketClient::new(web, identity, socket));

        Ok(Self::spawn_with(
            client,
            events,
            channel,
            config.game.greeting.clone(),
            config.game.farewell.clone(),
            Box::new(ThreadRngPicker),
        ))
    }

    fn spawn_with(
        client: Arc<dyn SlackClient>,
        events: mpsc::UnboundedReceiver<SlackEvent>,
        channel: Channel,
        greeting: Option<String>,
        farewell: String,
        picker: Box<dyn Picker>,
    ) -> Self {
        let (halt_tx, halt_rx) = mpsc::channel(1);
        let event_loop = EventLoop {
            client,
            events,
            halt: halt_rx,
            channel,
            greeting,
            farewell,
            picker,
            greeted: false,
            last_error: None,
            stream_closed: false,
        };
        tokio::spawn(event_loop.run());
        Self { halt: halt_tx }
    }

    /// Posts the farewell, disconnects and waits for the loop to finish.
    ///
    /// Returns the last error the loop recorded while it ran. Errors never
    /// stop the game on their own, so this is the only place they surface.
    pub async fn stop(self) -> Result<(), BotError> {
        let (done, result) = oneshot::channel();
        self.halt.send(HaltRequest { done }).await.map_err(|_| BotError::LoopClosed)?;
        match result.await {
            Ok(None) => Ok(()),
            Ok(Some(error)) => Err(error),
            Err(_) => Err(BotError::LoopClosed),
        }
    }
}

struct EventLoop {
    client: Arc<dyn SlackClient>,
    events: mpsc::UnboundedReceiver<SlackEvent>,
    halt: mpsc::Receiver<HaltRequest>,
    channel: Channel,
    greeting: Option<String>,
    farewell: String,
    picker: Box<dyn Picker>,
    greeted: bool,
    last_error: Option<BotError>,
    stream_closed: bool,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                maybe_event = self.events.recv(), if !self.stream_closed => {
                    match maybe_event {
                        Some(event) => {
                            trace!(kind = event.kind(), "event received");
                            if let Err(error) = self.handle_event(event).await {
                                warn!(error = %error, "event handling failed; the game continues");
                                self.last_error = Some(error);
                            }
                        }
                        None => {
                            debug!("event stream closed; waiting for stop");
                            self.stream_closed = true;
                        }
                    }
                }
                request = self.halt.recv() => {
                    self.shutdown(request).await;
                    return;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: SlackEvent) -> Result<(), BotError> {
        match event {
            SlackEvent::Connecting { attempt } => {
                info!(attempt, "connecting to slack");
                Ok(())
            }
            SlackEvent::ConnectionError(error) => Err(BotError::Connection(error)),
            SlackEvent::InvalidAuth => Err(BotError::InvalidAuth),
            SlackEvent::Hello => {
                info!("slack session established");
                self.post_greeting().await;
                Ok(())
            }
            SlackEvent::Connected => {
                info!(channel = %self.channel.name, "connected; the game is on");
                Ok(())
            }
            SlackEvent::Message(message) => self.handle_message(message).await,
            SlackEvent::Other { kind } => {
                debug!(kind = %kind, "ignoring event");
                Ok(())
            }
        }
    }

    async fn handle_message(&mut self, message: MessageEvent) -> Result<(), BotError> {
        let bot = self.client.identity().user_id.clone();
        match game::resolve(&message, &self.channel.id, &bot) {
            Action::Ignore => Ok(()),
            Action::Nominate { caller } => {
                info!(caller = %caller, "nomination requested");
                game::nominate(
                    self.client.as_ref(),
                    &self.channel.id,
                    &caller,
                    self.picker.as_mut(),
                )
                .await
                .map_err(BotError::Game)
            }
        }
    }

    /// Slack rotates connections, so `hello` arrives again on every refresh.
    /// The greeting goes out once per process.
    async fn post_greeting(&mut self) {
        if self.greeted {
            return;
        }
        let Some(greeting) = &self.greeting else { return };
        self.greeted = true;
        if let Err(error) =
            self.client.post_message(&self.channel.id, greeting, PostOptions::default()).await
        {
            warn!(error = %error, "could not post the greeting");
        }
    }

    async fn shutdown(&mut self, request: Option<HaltRequest>) {
        info!(channel = %self.channel.name, "stopping the musicof game");
        if let Err(error) =
            self.client.post_message(&self.channel.id, &self.farewell, PostOptions::default()).await
        {
            warn!(error = %error, "could not post the farewell");
        }
        if let Err(error) = self.client.disconnect().await {
            warn!(error = %error, "disconnect failed");
            self.last_error = Some(BotError::Disconnect(error));
        }
        let Some(request) = request else {
            debug!("bot handle dropped without stop; nobody to report to");
            return;
        };
        let _ = request.done.send(self.last_error.take());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex, Notify};
    use tokio::time::{sleep, timeout};

    use musicof_core::domain::{BotIdentity, Channel, ChannelId, Participant, UserId};
    use musicof_core::random::SequencePicker;

    use super::{Bot, BotError};
    use crate::client::{ApiError, PostOptions, SlackClient};
    use crate::events::{MessageEvent, SlackEvent, TransportError};
    use crate::game::GameError;

    const CHANNEL: &str = "C0MUSIC01";
    const FAREWELL: &str = "The musicof game is over. See you next time!";

    struct PostGate {
        entered: Notify,
        release: Notify,
    }

    struct FakeClient {
        identity: BotIdentity,
        state: Mutex<FakeState>,
    }

    #[derive(Default)]
    struct FakeState {
        members: Vec<UserId>,
        names: HashMap<String, String>,
        posts: Vec<(ChannelId, String, bool)>,
        disconnects: usize,
        disconnect_error: bool,
        gate: Option<Arc<PostGate>>,
    }

    impl FakeClient {
        fn new(bot: &str, members: &[&str]) -> Self {
            Self {
                identity: BotIdentity {
                    user_id: UserId(bot.to_string()),
                    name: "musicof".to_string(),
                },
                state: Mutex::new(FakeState {
                    members: members.iter().map(|id| UserId(id.to_string())).collect(),
                    ..FakeState::default()
                }),
            }
        }
    }

    #[async_trait]
    impl SlackClient for FakeClient {
        fn identity(&self) -> &BotIdentity {
            &self.identity
        }

        async fn channel_info(&self, channel: &ChannelId) -> Result<Channel, ApiError> {
            Ok(Channel { id: channel.clone(), name: "music".to_string() })
        }

        async fn conversation_members(
            &self,
            _channel: &ChannelId,
        ) -> Result<Vec<UserId>, ApiError> {
            Ok(self.state.lock().await.members.clone())
        }

        async fn user_info(&self, user: &UserId) -> Result<Participant, ApiError> {
            let state = self.state.lock().await;
            let name = state.names.get(&user.0).cloned().unwrap_or_else(|| user.0.clone());
            Ok(Participant { id: user.clone(), name })
        }

        async fn post_message(
            &self,
            channel: &ChannelId,
            text: &str,
            options: PostOptions,
        ) -> Result<(), ApiError> {
            let gate = self.state.lock().await.gate.take();
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            let mut state = self.state.lock().await;
            state.posts.push((channel.clone(), text.to_string(), options.link_names));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), ApiError> {
            let mut state = self.state.lock().await;
            state.disconnects += 1;
            if state.disconnect_error {
                return Err(ApiError::Rejected {
                    method: "socket.disconnect",
                    code: "cant_disconnect".to_string(),
                });
            }
            Ok(())
        }
    }

    fn channel() -> Channel {
        Channel { id: ChannelId(CHANNEL.to_string()), name: "music".to_string() }
    }

    fn spawn_bot(
        client: &Arc<FakeClient>,
        greeting: Option<&str>,
        picker: SequencePicker,
    ) -> (mpsc::UnboundedSender<SlackEvent>, Bot) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let bot = Bot::spawn_with(
            Arc::clone(client) as Arc<dyn SlackClient>,
            events_rx,
            channel(),
            greeting.map(str::to_string),
            FAREWELL.to_string(),
            Box::new(picker),
        );
        (events_tx, bot)
    }

    fn nominate_from(user: &str) -> SlackEvent {
        SlackEvent::Message(MessageEvent {
            channel: ChannelId(CHANNEL.to_string()),
            user: UserId(user.to_string()),
            bot_id: None,
            text: "<@U0> nominate".to_string(),
        })
    }

    async fn texts(client: &FakeClient) -> Vec<String> {
        client.state.lock().await.posts.iter().map(|(_, text, _)| text.clone()).collect()
    }

    async fn wait_for_posts(client: &FakeClient, count: usize) {
        timeout(Duration::from_secs(2), async {
            loop {
                if client.state.lock().await.posts.len() >= count {
                    return;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("posts did not arrive in time");
    }

    #[tokio::test]
    async fn processes_nominations_in_arrival_order() {
        let client = Arc::new(FakeClient::new("U0", &["U0", "U1", "U2", "U3"]));
        {
            let mut state = client.state.lock().await;
            state.names.insert("U1".to_string(), "alice".to_string());
            state.names.insert("U2".to_string(), "bob".to_string());
            state.names.insert("U3".to_string(), "carol".to_string());
        }
        let (events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![0, 0, 0]));

        events.send(nominate_from("U1")).unwrap();
        events.send(nominate_from("U2")).unwrap();
        events.send(nominate_from("U3")).unwrap();
        wait_for_posts(&client, 3).await;

        bot.stop().await.expect("stop");

        assert_eq!(texts(&client).await, vec!["@bob", "@alice", "@alice", FAREWELL]);
    }

    #[tokio::test]
    async fn stop_posts_the_farewell_and_disconnects() {
        let client = Arc::new(FakeClient::new("U0", &["U0"]));
        let (_events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![]));

        bot.stop().await.expect("stop");

        let state = client.state.lock().await;
        assert_eq!(state.posts.len(), 1);
        let (channel, text, link_names) = &state.posts[0];
        assert_eq!(channel, &ChannelId(CHANNEL.to_string()));
        assert_eq!(text, FAREWELL);
        assert!(!*link_names);
        assert_eq!(state.disconnects, 1);
    }

    #[tokio::test]
    async fn stop_reports_an_error_recorded_by_the_loop() {
        let client = Arc::new(FakeClient::new("U0", &["U0", "U1", "U3"]));
        let (events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![0]));

        events
            .send(SlackEvent::ConnectionError(TransportError::Receive("boom".to_string())))
            .unwrap();
        events.send(nominate_from("U1")).unwrap();
        wait_for_posts(&client, 1).await;

        let error = bot.stop().await.expect_err("the connection error should surface");
        assert!(matches!(
            error,
            BotError::Connection(TransportError::Receive(ref reason)) if reason == "boom"
        ));
    }

    #[tokio::test]
    async fn a_later_error_replaces_an_earlier_one() {
        let client = Arc::new(FakeClient::new("U0", &["U0", "U1", "U3"]));
        let (events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![0]));

        events.send(SlackEvent::InvalidAuth).unwrap();
        events
            .send(SlackEvent::ConnectionError(TransportError::Receive("late".to_string())))
            .unwrap();
        events.send(nominate_from("U1")).unwrap();
        wait_for_posts(&client, 1).await;

        let error = bot.stop().await.expect_err("the later error should win");
        assert!(matches!(
            error,
            BotError::Connection(TransportError::Receive(ref reason)) if reason == "late"
        ));
    }

    #[tokio::test]
    async fn invalid_auth_is_recorded_but_the_game_continues() {
        let client = Arc::new(FakeClient::new("U0", &["U0", "U1", "U3"]));
        let (events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![0, 0]));

        events.send(SlackEvent::InvalidAuth).unwrap();
        events.send(nominate_from("U1")).unwrap();
        events.send(nominate_from("U1")).unwrap();
        wait_for_posts(&client, 2).await;

        let error = bot.stop().await.expect_err("invalid auth should be reported");
        assert!(matches!(error, BotError::InvalidAuth));
        assert_eq!(texts(&client).await, vec!["@U3", "@U3", FAREWELL]);
    }

    #[tokio::test]
    async fn a_failed_nomination_does_not_stop_the_game() {
        let client = Arc::new(FakeClient::new("U0", &["U0", "U1"]));
        let (events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![0]));

        events.send(nominate_from("U1")).unwrap();
        events.send(nominate_from("U2")).unwrap();
        wait_for_posts(&client, 1).await;

        let error = bot.stop().await.expect_err("the empty pool should be reported");
        assert!(matches!(error, BotError::Game(GameError::NoEligibleParticipant)));
        assert_eq!(texts(&client).await, vec!["@U1", FAREWELL]);
    }

    #[tokio::test]
    async fn hello_posts_the_greeting_when_configured() {
        let client = Arc::new(FakeClient::new("U0", &["U0"]));
        let (events, bot) =
            spawn_bot(&client, Some("The game is afoot!"), SequencePicker::new(vec![]));

        events.send(SlackEvent::Hello).unwrap();
        wait_for_posts(&client, 1).await;

        bot.stop().await.expect("stop");
        assert_eq!(texts(&client).await, vec!["The game is afoot!", FAREWELL]);
    }

    #[tokio::test]
    async fn the_greeting_is_posted_once_across_reconnects() {
        let client = Arc::new(FakeClient::new("U0", &["U0"]));
        let (events, bot) = spawn_bot(&client, Some("hi"), SequencePicker::new(vec![]));

        events.send(SlackEvent::Hello).unwrap();
        events.send(SlackEvent::Hello).unwrap();
        wait_for_posts(&client, 1).await;

        bot.stop().await.expect("stop");
        assert_eq!(texts(&client).await, vec!["hi", FAREWELL]);
    }

    #[tokio::test]
    async fn hello_without_a_greeting_posts_nothing() {
        let client = Arc::new(FakeClient::new("U0", &["U0"]));
        let (events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![]));

        events.send(SlackEvent::Hello).unwrap();
        events.send(SlackEvent::Connected).unwrap();
        sleep(Duration::from_millis(20)).await;

        bot.stop().await.expect("stop");
        assert_eq!(texts(&client).await, vec![FAREWELL]);
    }

    #[tokio::test]
    async fn stop_still_works_after_the_event_stream_closes() {
        let client = Arc::new(FakeClient::new("U0", &["U0"]));
        let (events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![]));

        drop(events);
        sleep(Duration::from_millis(20)).await;

        bot.stop().await.expect("stop");
        assert_eq!(texts(&client).await, vec![FAREWELL]);
    }

    #[tokio::test]
    async fn an_in_flight_nomination_completes_before_the_farewell() {
        let gate = Arc::new(PostGate { entered: Notify::new(), release: Notify::new() });
        let client = Arc::new(FakeClient::new("U0", &["U0", "U1", "U3"]));
        client.state.lock().await.gate = Some(Arc::clone(&gate));
        let (events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![0]));

        events.send(nominate_from("U1")).unwrap();
        gate.entered.notified().await;

        let stopper = tokio::spawn(bot.stop());
        sleep(Duration::from_millis(20)).await;
        assert!(client.state.lock().await.posts.is_empty());

        gate.release.notify_one();
        stopper.await.unwrap().expect("stop");

        assert_eq!(texts(&client).await, vec!["@U3", FAREWELL]);
    }

    #[tokio::test]
    async fn a_disconnect_failure_surfaces_in_stop() {
        let client = Arc::new(FakeClient::new("U0", &["U0"]));
        client.state.lock().await.disconnect_error = true;
        let (_events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![]));

        let error = bot.stop().await.expect_err("disconnect should fail");
        assert!(matches!(error, BotError::Disconnect(_)));
    }

    #[tokio::test]
    async fn dropping_the_handle_shuts_the_loop_down() {
        let client = Arc::new(FakeClient::new("U0", &["U0"]));
        let (_events, bot) = spawn_bot(&client, None, SequencePicker::new(vec![]));

        drop(bot);

        timeout(Duration::from_secs(2), async {
            loop {
                if client.state.lock().await.disconnects == 1 {
                    return;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("the loop should shut down after the handle is dropped");
        assert_eq!(texts(&client).await, vec![FAREWELL]);
    }
}
