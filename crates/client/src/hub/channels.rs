//! Channel membership.
//!
//! The client remembers which channels the application asked for and replays
//! the joins after every automatic reconnect. Membership only changes through
//! an explicit join, leave or clear.

use std::collections::BTreeSet;
use std::fmt;

use meridian_shared::HubError;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::manager::HubClient;

pub(crate) type ChannelSet = BTreeSet<ChannelId>;

/// Identifier of a hub channel, e.g. `settlement:42`.
///
/// The `character:`, `settlement:` and `world:` prefixes map onto the hub's
/// dedicated join/leave methods; anything else goes through the generic
/// `JoinChannel` / `LeaveChannel` pair with the full id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn character(id: impl fmt::Display) -> Self {
        Self(format!("character:{}", id))
    }

    pub fn settlement(id: impl fmt::Display) -> Self {
        Self(format!("settlement:{}", id))
    }

    pub fn world(id: impl fmt::Display) -> Self {
        Self(format!("world:{}", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hub method and argument that subscribe to this channel.
    pub fn join_invocation(&self) -> (&'static str, String) {
        match self.scoped() {
            Some(("character", key)) => ("JoinCharacterChannel", key.to_string()),
            Some(("settlement", key)) => ("JoinSettlementChannel", key.to_string()),
            Some(("world", key)) => ("JoinWorldChannel", key.to_string()),
            _ => ("JoinChannel", self.0.clone()),
        }
    }

    /// Hub method and argument that unsubscribe from this channel.
    pub fn leave_invocation(&self) -> (&'static str, String) {
        match self.scoped() {
            Some(("character", key)) => ("LeaveCharacterChannel", key.to_string()),
            Some(("settlement", key)) => ("LeaveSettlementChannel", key.to_string()),
            Some(("world", key)) => ("LeaveWorldChannel", key.to_string()),
            _ => ("LeaveChannel", self.0.clone()),
        }
    }

    fn scoped(&self) -> Option<(&str, &str)> {
        self.0.split_once(':').filter(|(_, key)| !key.is_empty())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl HubClient {
    /// Join a channel, connecting first if needed.
    ///
    /// The channel is remembered only once the hub accepted the join.
    /// Joining a channel twice keeps a single membership.
    pub async fn join_channel(&self, channel: impl Into<ChannelId>) -> Result<(), HubError> {
        let channel = channel.into();
        if !self.is_connected() {
            self.start().await?;
        }

        let (method, argument) = channel.join_invocation();
        self.invoke(method, vec![Value::String(argument)]).await?;

        if self.inner.lock().channels.insert(channel.clone()) {
            info!(%channel, "joined channel");
        }
        Ok(())
    }

    /// Leave a channel.
    ///
    /// The channel is forgotten locally even when the hub call fails; that
    /// failure is still returned. While disconnected nothing is sent.
    pub async fn leave_channel(&self, channel: impl Into<ChannelId>) -> Result<(), HubError> {
        let channel = channel.into();
        let connected = {
            let mut state = self.inner.lock();
            state.channels.remove(&channel);
            state.connection().is_connected()
        };
        if !connected {
            debug!(%channel, "left channel while disconnected");
            return Ok(());
        }

        let (method, argument) = channel.leave_invocation();
        self.invoke(method, vec![Value::String(argument)]).await?;
        info!(%channel, "left channel");
        Ok(())
    }

    /// Snapshot of the remembered channels.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.inner.lock().channels.iter().cloned().collect()
    }

    pub fn is_member(&self, channel: &ChannelId) -> bool {
        self.inner.lock().channels.contains(channel)
    }

    /// Forget every channel without contacting the hub.
    pub fn clear_channels(&self) {
        self.inner.lock().channels.clear();
    }

    /// Re-issue the join for every remembered channel, one at a time.
    /// Failures are logged and leave membership untouched.
    pub(crate) async fn rejoin_all(&self) {
        let channels = self.channels();
        if channels.is_empty() {
            return;
        }

        info!(count = channels.len(), "rejoining channels");
        for channel in channels {
            let (method, argument) = channel.join_invocation();
            if let Err(err) = self.invoke(method, vec![Value::String(argument)]).await {
                warn!(%channel, error = %err, "failed to rejoin channel");
            }
        }
    }
}
