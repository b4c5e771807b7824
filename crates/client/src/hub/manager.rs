//! Hub connection manager.
//!
//! [`HubClient`] owns the single link to the game hub and its lifecycle:
//! coalesced `start()`, graceful `stop()`, and automatic reconnection with
//! backoff after an unexpected loss. Connection state, channel membership,
//! the listener registry and pending invocations all sit behind one mutex,
//! which is never held across an `.await` or while listeners run.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::StreamExt;
use meridian_shared::{events, EventDecodeError, HubError, HubEvent, HubMessage};
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use super::backoff::RetryState;
use super::channels::ChannelSet;
use super::dispatcher::EventDispatcher;
use super::gateway::PendingInvocations;
use super::state::ConnectionState;
use super::transport::{Link, Outbound, Transport, WebSocketTransport};
use crate::config::HubConfig;
use crate::token::TokenProvider;

type StartFuture = Shared<BoxFuture<'static, Result<(), HubError>>>;

/// Handle to the realtime hub connection.
///
/// Create one at the application's composition root and clone it into every
/// consumer; clones share the same connection.
#[derive(Clone)]
pub struct HubClient {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: HubConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    state: Mutex<HubState>,
    state_tx: watch::Sender<ConnectionState>,
}

#[derive(Default)]
pub(crate) struct HubState {
    connection: ConnectionState,
    retry: RetryState,
    pub(crate) channels: ChannelSet,
    pub(crate) listeners: EventDispatcher,
    pub(crate) invocations: PendingInvocations,
    pub(crate) link: Option<ActiveLink>,
    pending_start: Option<StartFuture>,
    reconnect_cancel: Option<oneshot::Sender<()>>,
    next_session: u64,
}

impl HubState {
    pub(crate) fn connection(&self) -> ConnectionState {
        self.connection
    }
}

/// The link currently in use. `session` tells a stale reader apart from the
/// current one.
pub(crate) struct ActiveLink {
    session: u64,
    connection_id: String,
    outbound: UnboundedSender<Outbound>,
}

impl ActiveLink {
    pub(crate) fn send(&self, message: HubMessage) -> Result<(), HubError> {
        self.outbound
            .unbounded_send(Outbound::Message(message))
            .map_err(|_| HubError::ConnectionLost)
    }

    async fn close(self, timeout: Duration) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.outbound.unbounded_send(Outbound::Close(done_tx)).is_ok() {
            let _ = tokio::time::timeout(timeout, done_rx).await;
        }
    }
}

enum StartStep {
    Await(StartFuture),
    WaitWhile(ConnectionState),
}

enum StopStep {
    AwaitHandshake(StartFuture),
    WaitWhile(ConnectionState),
    Close(Option<ActiveLink>, Option<oneshot::Sender<()>>),
    Done,
}

impl HubClient {
    pub fn new(config: HubConfig, transport: impl Transport, tokens: impl TokenProvider) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                transport: Arc::new(transport),
                tokens: Arc::new(tokens),
                state: Mutex::new(HubState::default()),
                state_tx,
            }),
        }
    }

    /// Client using the native WebSocket transport.
    pub fn with_websocket(config: HubConfig, tokens: impl TokenProvider) -> Self {
        let transport = WebSocketTransport::new(&config);
        Self::new(config, transport, tokens)
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Id of the current link, if connected.
    pub fn connection_id(&self) -> Option<String> {
        self.inner
            .lock()
            .link
            .as_ref()
            .map(|link| link.connection_id.clone())
    }

    /// Attempts used in the current reconnect episode.
    pub fn retry_attempts(&self) -> u32 {
        self.inner.lock().retry.attempts()
    }

    /// Observe state changes without polling.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Connect to the hub.
    ///
    /// Returns immediately when already connected. Concurrent callers during
    /// a handshake share its outcome; only one handshake is made. A failed
    /// handshake is returned and not retried.
    pub async fn start(&self) -> Result<(), HubError> {
        loop {
            let step = {
                let mut state = self.inner.lock();
                match state.connection {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Connecting => match state.pending_start.clone() {
                        Some(pending) => StartStep::Await(pending),
                        None => StartStep::WaitWhile(ConnectionState::Connecting),
                    },
                    ConnectionState::Disconnected => {
                        self.inner.transition(&mut state, ConnectionState::Connecting);
                        let handshake = tokio::spawn(Inner::establish(self.inner.clone()));
                        let pending: StartFuture = async move {
                            handshake.await.unwrap_or_else(|e| {
                                Err(HubError::Handshake(format!("handshake task failed: {}", e)))
                            })
                        }
                        .boxed()
                        .shared();
                        state.pending_start = Some(pending.clone());
                        StartStep::Await(pending)
                    }
                    other => StartStep::WaitWhile(other),
                }
            };

            match step {
                StartStep::Await(pending) => return pending.await,
                StartStep::WaitWhile(current) => {
                    let settled = self.wait_while(current).await;
                    if current == ConnectionState::Reconnecting
                        && settled == ConnectionState::Disconnected
                    {
                        return Err(HubError::ReconnectFailed(
                            "connection was abandoned while waiting".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Disconnect from the hub.
    ///
    /// An in-flight handshake settles first. Cancels any pending reconnect
    /// and fails outstanding invocations. Channel membership is kept.
    pub async fn stop(&self) {
        loop {
            let step = {
                let mut state = self.inner.lock();
                match state.connection {
                    ConnectionState::Disconnected => StopStep::Done,
                    ConnectionState::Connecting => match state.pending_start.clone() {
                        Some(pending) => StopStep::AwaitHandshake(pending),
                        None => StopStep::WaitWhile(ConnectionState::Connecting),
                    },
                    ConnectionState::Disconnecting => {
                        StopStep::WaitWhile(ConnectionState::Disconnecting)
                    }
                    ConnectionState::Connected | ConnectionState::Reconnecting => {
                        self.inner
                            .transition(&mut state, ConnectionState::Disconnecting);
                        state.invocations.fail_all();
                        StopStep::Close(state.link.take(), state.reconnect_cancel.take())
                    }
                }
            };

            match step {
                StopStep::Done => return,
                StopStep::AwaitHandshake(pending) => {
                    let _ = pending.await;
                }
                StopStep::WaitWhile(current) => {
                    self.wait_while(current).await;
                }
                StopStep::Close(link, cancel) => {
                    drop(cancel);
                    if let Some(link) = link {
                        link.close(self.inner.config.close_timeout).await;
                    }
                    {
                        let mut state = self.inner.lock();
                        self.inner
                            .transition(&mut state, ConnectionState::Disconnected);
                    }
                    info!("disconnected from game hub");
                    self.inner
                        .dispatch(&HubEvent::Disconnected(events::Disconnected {
                            reason: "connection stopped by client".to_string(),
                        }));
                    return;
                }
            }
        }
    }

    /// Full teardown: stop, then forget channel membership and listeners.
    pub async fn shutdown(&self) {
        self.stop().await;
        let mut state = self.inner.lock();
        state.channels.clear();
        state.listeners.clear();
    }

    /// Wait until the state differs from `current`; returns the new state.
    async fn wait_while(&self, current: ConnectionState) -> ConnectionState {
        let mut changes = self.inner.state_tx.subscribe();
        loop {
            let observed = *changes.borrow_and_update();
            if observed != current {
                return observed;
            }
            if changes.changed().await.is_err() {
                return observed;
            }
        }
    }
}

impl fmt::Debug for HubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("HubClient")
            .field("url", &self.inner.config.url.as_str())
            .field("state", &state.connection)
            .field("channels", &state.channels.len())
            .finish()
    }
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: &mut HubState, next: ConnectionState) {
        let current = state.connection;
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "unexpected connection state transition");
        }
        debug!(from = %current, to = %next, "connection state changed");
        state.connection = next;
        self.state_tx.send_replace(next);
    }

    fn install_link(&self, state: &mut HubState, link: Link) -> (u64, UnboundedReceiver<HubMessage>) {
        state.next_session += 1;
        let session = state.next_session;
        state.link = Some(ActiveLink {
            session,
            connection_id: link.connection_id,
            outbound: link.outbound,
        });
        (session, link.inbound)
    }

    fn spawn_reader(self: &Arc<Self>, session: u64, inbound: UnboundedReceiver<HubMessage>) {
        tokio::spawn(read_loop(Arc::downgrade(self), session, inbound));
    }

    /// The handshake behind `start()`. Runs as its own task.
    async fn establish(self: Arc<Self>) -> Result<(), HubError> {
        let token = self.tokens.token();
        let outcome = self.transport.connect(&self.config.url, token).await;

        let mut state = self.lock();
        state.pending_start = None;
        match outcome {
            Ok(link) => {
                let connection_id = link.connection_id.clone();
                let (session, inbound) = self.install_link(&mut state, link);
                state.retry.reset();
                self.transition(&mut state, ConnectionState::Connected);
                drop(state);

                info!(%connection_id, "connected to game hub");
                self.dispatch(&HubEvent::Connected(events::Connected { connection_id }));
                self.spawn_reader(session, inbound);
                Ok(())
            }
            Err(err) => {
                self.transition(&mut state, ConnectionState::Disconnected);
                drop(state);
                error!(error = %err, "hub connection failed");
                Err(err)
            }
        }
    }

    fn route_invocation(&self, method: &str, arguments: Vec<Value>) {
        match HubEvent::from_invocation(method, arguments) {
            Ok(event) => self.dispatch(&event),
            Err(EventDecodeError::UnknownTarget(_)) => {
                debug!(method, "ignoring invocation of unknown hub event")
            }
            Err(err) => warn!(method, error = %err, "dropping hub invocation"),
        }
    }

    /// Called by the reader of `session` once its inbound stream ends.
    /// `reconnect` is false when the hub closed the session for good.
    fn link_lost(self: &Arc<Self>, session: u64, reason: String, reconnect: bool) {
        let mut state = self.lock();
        if state.link.as_ref().map(|link| link.session) != Some(session) {
            return;
        }
        state.link = None;
        state.invocations.fail_all();
        if state.connection != ConnectionState::Connected {
            return;
        }

        if !reconnect {
            self.transition(&mut state, ConnectionState::Disconnecting);
            self.transition(&mut state, ConnectionState::Disconnected);
            drop(state);

            warn!(%reason, "hub closed the connection without reconnect");
            self.dispatch(&HubEvent::Disconnected(events::Disconnected { reason }));
            return;
        }

        self.transition(&mut state, ConnectionState::Reconnecting);
        state.retry.reset();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        state.reconnect_cancel = Some(cancel_tx);
        drop(state);

        warn!(%reason, "lost connection to game hub");
        self.dispatch(&HubEvent::Reconnecting(events::Reconnecting {}));
        tokio::spawn(reconnect_loop(self.clone(), cancel_rx, reason));
    }
}

async fn read_loop(client: Weak<Inner>, session: u64, mut inbound: UnboundedReceiver<HubMessage>) {
    let mut reason = None;
    let mut reconnect = true;
    while let Some(message) = inbound.next().await {
        let Some(inner) = client.upgrade() else {
            return;
        };
        match message {
            HubMessage::Invocation {
                target, arguments, ..
            } => inner.route_invocation(&target, arguments),
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => inner.complete_invocation(&invocation_id, result, error),
            HubMessage::Ping => trace!("hub ping"),
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                reason = Some(error.unwrap_or_else(|| "hub closed the connection".to_string()));
                reconnect = allow_reconnect;
                break;
            }
            HubMessage::Other(kind) => debug!(kind, "ignoring hub message"),
        }
    }

    if let Some(inner) = client.upgrade() {
        inner.link_lost(
            session,
            reason.unwrap_or_else(|| "transport closed".to_string()),
            reconnect,
        );
    }
}

/// One reconnect episode. Ends on success, on exhaustion, or when `cancel`
/// fires (sent or dropped by `stop()`).
async fn reconnect_loop(inner: Arc<Inner>, mut cancel: oneshot::Receiver<()>, mut last_error: String) {
    loop {
        let next = {
            let mut state = inner.lock();
            if state.connection != ConnectionState::Reconnecting {
                return;
            }
            state
                .retry
                .next_delay(&inner.config.reconnect)
                .map(|delay| (delay, state.retry.attempts()))
        };

        let Some((delay, attempt)) = next else {
            {
                let mut state = inner.lock();
                if state.connection != ConnectionState::Reconnecting {
                    return;
                }
                state.reconnect_cancel = None;
                inner.transition(&mut state, ConnectionState::Disconnected);
            }
            let reason = format!(
                "gave up after {} reconnect attempts: {}",
                inner.config.reconnect.max_attempts, last_error
            );
            error!(%reason, "could not reconnect to game hub");
            inner.dispatch(&HubEvent::Disconnected(events::Disconnected { reason }));
            return;
        };

        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting to game hub"
        );
        tokio::select! {
            _ = &mut cancel => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let token = inner.tokens.token();
        let outcome = tokio::select! {
            _ = &mut cancel => return,
            outcome = inner.transport.connect(&inner.config.url, token) => outcome,
        };

        match outcome {
            Ok(link) => {
                let (connection_id, session, inbound) = {
                    let mut state = inner.lock();
                    if state.connection != ConnectionState::Reconnecting {
                        // stop() won the race; the unused link closes when dropped.
                        return;
                    }
                    state.reconnect_cancel = None;
                    let connection_id = link.connection_id.clone();
                    let (session, inbound) = inner.install_link(&mut state, link);
                    state.retry.reset();
                    inner.transition(&mut state, ConnectionState::Connected);
                    (connection_id, session, inbound)
                };

                info!(%connection_id, attempt, "reconnected to game hub");
                inner.dispatch(&HubEvent::Reconnected(events::Reconnected { connection_id }));
                inner.spawn_reader(session, inbound);
                HubClient { inner }.rejoin_all().await;
                return;
            }
            Err(err) => {
                warn!(attempt, error = %err, "reconnect attempt failed");
                last_error = err.to_string();
            }
        }
    }
}
