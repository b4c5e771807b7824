//! Realtime connection to the Dusk Meridian game hub.
//!
//! This module provides:
//! - One managed connection with automatic reconnect and backoff
//! - Channel membership that is replayed after every reconnect
//! - Typed event fan-out to registered listeners
//! - Request/response invocations on the hub
//!
//! # Architecture
//!
//! ```text
//!   TokenProvider ──► HubClient ──► Transport (WebSocket)
//!                       │    ▲
//!                       │    └── reader task: events, completions, link loss
//!                       │
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!   ┌──────────┐  ┌────────────┐  ┌──────────┐
//!   │ channels │  │ dispatcher │  │ gateway  │
//!   │ (rejoin) │  │ (on / off) │  │ (invoke) │
//!   └──────────┘  └────────────┘  └──────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let client = HubClient::with_websocket(HubConfig::from_env()?, EnvToken::new("MERIDIAN_HUB_TOKEN"));
//! client.start().await?;
//! client.join_channel(ChannelId::settlement(42)).await?;
//!
//! let _sub = client.on_event(|moved: &CharacterMoved| {
//!     tracing::info!(character = %moved.character_id, "moved");
//! });
//! ```

mod backoff;
mod channels;
mod dispatcher;
mod gateway;
mod manager;
mod state;
pub mod transport;

#[cfg(feature = "ui")]
pub mod hooks;

pub use backoff::{ReconnectConfig, RetryState};
pub use channels::ChannelId;
pub use dispatcher::{deliver, listener, EventDispatcher, Listener, Subscription};
pub use manager::HubClient;
pub use state::ConnectionState;
pub use transport::{Link, Outbound, Transport, WebSocketTransport};
