//! `meridian-tail`: connect to the game hub, join channels and log every event.
//!
//! Environment:
//! - `MERIDIAN_HUB_URL` and the other `MERIDIAN_*` settings read by `HubConfig::from_env`
//! - `MERIDIAN_HUB_TOKEN`: bearer token (optional)
//! - `MERIDIAN_CHANNELS`: comma separated channel ids, e.g. `world:1,settlement:42`

use anyhow::Context;
use meridian_client::hub::listener;
use meridian_client::{ChannelId, EnvToken, EventKind, HubClient, HubConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("meridian_client=debug,meridian_tail=info")),
        )
        .init();

    let config = HubConfig::from_env().context("reading hub configuration")?;
    info!(url = %config.url, "meridian-tail starting");
    let client = HubClient::with_websocket(config, EnvToken::new("MERIDIAN_HUB_TOKEN"));

    let log_event = listener(|event| match serde_json::to_string(event) {
        Ok(json) => info!(event = %event.kind(), "{}", json),
        Err(e) => warn!(event = %event.kind(), error = %e, "unprintable event"),
    });
    for kind in EventKind::ALL {
        client.on(*kind, log_event.clone()).detach();
    }

    client.start().await.context("connecting to the game hub")?;

    let channels = std::env::var("MERIDIAN_CHANNELS").unwrap_or_default();
    for channel in channels.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let channel = ChannelId::from(channel);
        if let Err(e) = client.join_channel(channel.clone()).await {
            warn!(%channel, error = %e, "could not join channel");
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");
    client.shutdown().await;
    Ok(())
}
