//! Dusk Meridian realtime client.
//!
//! Keeps one connection to the game hub alive across network interruptions,
//! remembers the channels the application joined and replays them after a
//! reconnect, fans server-pushed events out to listeners, and exposes the
//! hub's request/response invocations.
//!
//! See [`hub`] for the architecture and [`HubClient`] for the entry point.

pub mod config;
pub mod hub;
pub mod token;

pub use config::HubConfig;
pub use hub::{ChannelId, ConnectionState, HubClient, ReconnectConfig, Subscription};
pub use token::{EnvToken, StaticToken, TokenProvider};

pub use meridian_shared as shared;
pub use meridian_shared::{EventKind, HubError, HubEvent};
