//! Shared types for the Dusk Meridian realtime client: hub wire protocol,
//! the event vocabulary pushed by the game server, and the error type.

pub mod error;
pub mod events;
pub mod models;
pub mod protocol;

pub use error::*;
pub use events::*;
pub use models::*;
pub use protocol::*;
