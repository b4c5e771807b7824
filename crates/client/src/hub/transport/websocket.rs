//! Native WebSocket transport using tokio-tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use meridian_shared::{
    encode_record, split_records, try_problem_detail, HandshakeRequest, HandshakeResponse,
    HubError, HubMessage, NegotiateResponse,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, trace, warn};
use url::Url;
use uuid::Uuid;

use super::{Link, Outbound, Transport};
use crate::config::HubConfig;

/// Connects to the hub over WebSocket, negotiating first unless disabled.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    http: reqwest::Client,
    skip_negotiation: bool,
    handshake_timeout: Duration,
    keep_alive_interval: Duration,
    server_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            skip_negotiation: config.skip_negotiation,
            handshake_timeout: config.handshake_timeout,
            keep_alive_interval: config.keep_alive_interval,
            server_timeout: config.server_timeout,
        }
    }

    async fn negotiate(&self, endpoint: &Url, token: Option<&str>) -> Result<NegotiateResponse, HubError> {
        let url = negotiate_url(endpoint)?;
        let mut request = self.http.post(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HubError::Handshake(format!("negotiate failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = try_problem_detail(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(HubError::Handshake(format!("negotiate rejected: {}", detail)));
        }

        let negotiated: NegotiateResponse = response
            .json()
            .await
            .map_err(|e| HubError::Handshake(format!("invalid negotiate response: {}", e)))?;
        if let Some(error) = negotiated.error {
            return Err(HubError::Handshake(error));
        }
        Ok(negotiated)
    }

    async fn open(&self, endpoint: &Url, token: Option<String>) -> Result<Link, HubError> {
        let (connection_id, socket_id) = if self.skip_negotiation {
            (Uuid::new_v4().to_string(), None)
        } else {
            let negotiated = self.negotiate(endpoint, token.as_deref()).await?;
            let id = negotiated.connection_id.ok_or_else(|| {
                HubError::Handshake("negotiate response without connectionId".to_string())
            })?;
            let socket_id = negotiated.connection_token.unwrap_or_else(|| id.clone());
            (id, Some(socket_id))
        };

        let url = socket_url(endpoint, socket_id.as_deref(), token.as_deref())?;
        let (mut ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| HubError::Handshake(e.to_string()))?;

        send_record(&mut ws_stream, &HandshakeRequest::default())
            .await
            .map_err(|e| HubError::Handshake(e.to_string()))?;
        let early = await_handshake(&mut ws_stream).await?;
        debug!(%connection_id, "hub handshake complete");

        let (write, read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = unbounded();
        let (inbound_tx, inbound_rx) = unbounded();

        for message in early {
            let _ = inbound_tx.unbounded_send(message);
        }

        tokio::spawn(read_loop(
            connection_id.clone(),
            read,
            inbound_tx,
            self.server_timeout,
        ));
        tokio::spawn(write_loop(
            connection_id.clone(),
            write,
            outbound_rx,
            self.keep_alive_interval,
        ));

        Ok(Link {
            connection_id,
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Url, token: Option<String>) -> Result<Link, HubError> {
        match tokio::time::timeout(self.handshake_timeout, self.open(endpoint, token)).await {
            Ok(result) => result,
            Err(_) => Err(HubError::Handshake(format!(
                "timed out after {}ms",
                self.handshake_timeout.as_millis()
            ))),
        }
    }
}

/// `POST` target for negotiation: the hub URL over HTTP(S) plus `/negotiate`.
fn negotiate_url(endpoint: &Url) -> Result<Url, HubError> {
    let mut url = endpoint.clone();
    let scheme = match endpoint.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    };
    url.set_scheme(scheme)
        .map_err(|_| HubError::Config(format!("cannot negotiate with {}", endpoint)))?;
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    Ok(url)
}

/// Socket URL: the hub URL over WS(S) with the connection id and token as query.
fn socket_url(endpoint: &Url, socket_id: Option<&str>, token: Option<&str>) -> Result<Url, HubError> {
    let mut url = endpoint.clone();
    let scheme = match endpoint.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => other,
    };
    url.set_scheme(scheme)
        .map_err(|_| HubError::Config(format!("cannot open a socket to {}", endpoint)))?;

    if socket_id.is_some() || token.is_some() {
        let mut query = url.query_pairs_mut();
        if let Some(id) = socket_id {
            query.append_pair("id", id);
        }
        if let Some(token) = token {
            query.append_pair("access_token", token);
        }
    }
    Ok(url)
}

async fn send_record<S, T>(write: &mut S, value: &T) -> Result<(), HubError>
where
    S: Sink<Message, Error = WsError> + Unpin,
    T: serde::Serialize,
{
    let record = encode_record(value)?;
    write
        .send(Message::Text(record.into()))
        .await
        .map_err(|e| HubError::Transport(e.to_string()))
}

/// Wait for the handshake response. Returns any hub messages that arrived in
/// the same frame.
async fn await_handshake<S>(stream: &mut S) -> Result<Vec<HubMessage>, HubError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let text = match frame.map_err(|e| HubError::Handshake(e.to_string()))? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let mut records = split_records(text.as_str());
        let Some(first) = records.next() else {
            continue;
        };
        let response: HandshakeResponse = serde_json::from_str(first)
            .map_err(|e| HubError::Handshake(format!("invalid handshake response: {}", e)))?;
        if let Some(error) = response.error {
            return Err(HubError::Handshake(error));
        }
        return records.map(HubMessage::decode).collect();
    }
    Err(HubError::Handshake("socket closed during handshake".to_string()))
}

async fn read_loop<S>(
    connection_id: String,
    mut read: S,
    inbound: UnboundedSender<HubMessage>,
    server_timeout: Duration,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = match tokio::time::timeout(server_timeout, read.next()).await {
            Err(_) => {
                warn!(
                    %connection_id,
                    "no message from hub for {}ms, dropping link",
                    server_timeout.as_millis()
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!(%connection_id, error = %e, "WebSocket read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                for record in split_records(text.as_str()) {
                    trace!(%connection_id, record, "hub record received");
                    match HubMessage::decode(record) {
                        Ok(message) => {
                            if inbound.unbounded_send(message).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(%connection_id, error = %e, "dropping undecodable record"),
                    }
                }
            }
            Message::Close(frame) => {
                debug!(%connection_id, ?frame, "hub sent close frame");
                break;
            }
            // Pong is handled by tungstenite; the JSON protocol never uses binary frames.
            _ => {}
        }
    }
    debug!(%connection_id, "reader stopped");
}

async fn write_loop<S>(
    connection_id: String,
    mut write: S,
    mut outbound: UnboundedReceiver<Outbound>,
    keep_alive_interval: Duration,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut keep_alive = tokio::time::interval(keep_alive_interval.max(Duration::from_millis(100)));
    // The first tick completes immediately.
    keep_alive.tick().await;

    loop {
        tokio::select! {
            command = outbound.next() => match command {
                Some(Outbound::Message(message)) => {
                    trace!(%connection_id, ?message, "sending hub message");
                    if let Err(e) = send_record(&mut write, &message).await {
                        warn!(%connection_id, error = %e, "send failed");
                        break;
                    }
                }
                Some(Outbound::Close(done)) => {
                    let _ = write.close().await;
                    let _ = done.send(());
                    break;
                }
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
            _ = keep_alive.tick() => {
                if let Err(e) = send_record(&mut write, &HubMessage::Ping).await {
                    warn!(%connection_id, error = %e, "keep-alive ping failed");
                    break;
                }
            }
        }
    }
    debug!(%connection_id, "writer stopped");
}
