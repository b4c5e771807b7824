//! Transport seam between the hub client and the network.
//!
//! A [`Transport`] performs one complete connection attempt (negotiation,
//! socket upgrade and protocol handshake) and hands back a [`Link`]: two
//! message channels and the server-assigned connection id. The hub client
//! never touches sockets directly.
//!
//! The link is considered lost when its inbound stream ends. Dropping the
//! outbound sender or sending [`Outbound::Close`] asks the transport to shut
//! the socket down.

use async_trait::async_trait;
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use meridian_shared::{HubError, HubMessage};
use tokio::sync::oneshot;
use url::Url;

mod websocket;

pub use websocket::WebSocketTransport;

/// Opens links to the hub.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Make one connection attempt. `token` is the bearer credential fetched
    /// for this attempt, if any.
    async fn connect(&self, endpoint: &Url, token: Option<String>) -> Result<Link, HubError>;
}

/// Commands accepted by a link's writer.
#[derive(Debug)]
pub enum Outbound {
    Message(HubMessage),
    /// Close the socket gracefully; the sender is notified once it is closed.
    Close(oneshot::Sender<()>),
}

/// An established connection.
#[derive(Debug)]
pub struct Link {
    pub connection_id: String,
    pub outbound: UnboundedSender<Outbound>,
    pub inbound: UnboundedReceiver<HubMessage>,
}
