//! Slack Integration - Socket Mode reply bot
//!
//! This crate provides the Slack side of replybot:
//! - **Client** (`client`) - Web API calls: `chat.postMessage`, `apps.connections.open`
//! - **Socket Mode** (`socket`, `ws`) - connection lifecycle, reconnects, frame decoding
//! - **Events** (`events`) - Events API envelope and inner event model
//! - **Dispatch** (`dispatcher`) - acknowledgment and reply routing
//! - **Runner** (`runner`) - session and dispatcher tasks wired together
//!
//! # Getting Started
//!
//! 1. Create a Slack app at https://api.slack.com/apps
//! 2. Enable Socket Mode and subscribe to `app_mention`, `message.channels`
//!    and `member_joined_channel`
//! 3. Set env vars: `SLACK_APP_TOKEN` (`xapp-...`), `SLACK_BOT_TOKEN` (`xoxb-...`)
//!
//! # Architecture
//!
//! ```text
//! WebSocket → SocketModeSession ──mpsc──→ EventDispatcher → SlackWebClient
//!                    ↑                          │
//!                    └──── ack(envelope_id) ────┘
//! ```
//!
//! # Key Types
//!
//! - `SocketModeSession` - connection lifecycle with reconnection logic
//! - `EventDispatcher` - acks callbacks and routes inner events to replies
//! - `SocketModeRunner` - spawns both and waits for shutdown

pub mod client;
pub mod dispatcher;
pub mod events;
pub mod runner;
pub mod socket;
pub mod ws;

pub use client::{MessagePoster, SlackWebClient};
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use runner::{RunReport, RunnerError, SocketModeRunner};
pub use socket::{ReconnectPolicy, SessionState, SocketModeSession, SocketTransport};
pub use ws::WebSocketTransport;
