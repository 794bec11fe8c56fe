//! Slack Integration - Socket Mode game bot
//!
//! This crate provides the Slack interface for musicof:
//! - **Bot** (`bot`) - the game loop: start, dispatch, stop
//! - **Game** (`game`) - nomination command resolution and selection
//! - **Socket Mode** (`socket`) - WebSocket connection to Slack (no public URL needed)
//! - **Web API** (`web`) - the handful of HTTP methods the game calls
//! - **Events** (`events`) - the event stream handed to the game loop
//!
//! # Getting Started
//!
//! 1. Create a Slack app at https://api.slack.com/apps
//! 2. Enable Socket Mode and subscribe to `message.channels`
//! 3. Invite the bot to the game channel
//! 4. Set env vars: `MUSICOF_SLACK_APP_TOKEN`, `MUSICOF_SLACK_BOT_TOKEN`,
//!    `MUSICOF_SLACK_CHANNEL`
//!
//! # Architecture
//!
//! ```text
//! Slack (wss) → SocketConnector → SlackEvent stream → Bot loop → game
//!                                                        ↓
//!                                          WebApiClient (chat.postMessage)
//! ```
//!
//! # Key Types
//!
//! - `Bot` - spawned game loop with a stop rendezvous
//! - `SlackClient` - the capability trait the game plays against
//! - `SocketConnector` - WebSocket worker with reconnection logic
//! - `WebApiClient` - thin `reqwest` wrapper over the Slack Web API

pub mod bot;
pub mod client;
pub mod events;
pub mod game;
pub mod socket;
pub mod web;
