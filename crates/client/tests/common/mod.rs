//! In-memory hub used by the integration tests.
//!
//! `FakeHub` implements [`Transport`] without any socket: every successful
//! connect spawns a responder that records invocations and answers them,
//! and the test can push events or cut the link at will.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use meridian_client::hub::{listener, ConnectionState, Link, Outbound, ReconnectConfig, Transport};
use meridian_client::{EventKind, HubClient, HubConfig, HubError, HubEvent};
use meridian_shared::HubMessage;
use serde_json::Value;
use url::Url;

#[derive(Default)]
struct Script {
    outcomes: VecDeque<Result<(), HubError>>,
    connects: usize,
    tokens: Vec<Option<String>>,
    invocations: Vec<(String, Vec<Value>)>,
    failing: HashSet<String>,
    silent: HashSet<String>,
    handshake_delay: Duration,
    server: Option<UnboundedSender<HubMessage>>,
}

#[derive(Clone, Default)]
pub struct FakeHub {
    script: Arc<Mutex<Script>>,
}

impl FakeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Outcome of the next connection attempt. Unscripted attempts succeed.
    pub fn push_outcome(&self, outcome: Result<(), HubError>) {
        self.script().outcomes.push_back(outcome);
    }

    /// Fail the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        for _ in 0..n {
            self.push_outcome(Err(HubError::Handshake("hub unavailable".to_string())));
        }
    }

    pub fn set_handshake_delay(&self, delay: Duration) {
        self.script().handshake_delay = delay;
    }

    /// Invocations of `method` complete with an error.
    pub fn fail_method(&self, method: &str) {
        self.script().failing.insert(method.to_string());
    }

    pub fn allow_method(&self, method: &str) {
        self.script().failing.remove(method);
    }

    /// Invocations of `method` are never answered.
    pub fn ignore_method(&self, method: &str) {
        self.script().silent.insert(method.to_string());
    }

    pub fn connects(&self) -> usize {
        self.script().connects
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.script().tokens.clone()
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.script().invocations.clone()
    }

    /// Invocations of `method`, by their first argument.
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.script()
            .invocations
            .iter()
            .filter(|(target, _)| target == method)
            .map(|(_, args)| args.first().cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn clear_invocations(&self) {
        self.script().invocations.clear();
    }

    /// Cut the current link as if the network went away.
    pub fn drop_connection(&self) {
        if let Some(server) = self.script().server.take() {
            server.close_channel();
        }
    }

    /// Hub-initiated close carrying `error`; the client may reconnect.
    pub fn close_from_server(&self, error: &str) {
        self.send_close(error, true);
    }

    /// Hub-initiated close that forbids reconnecting.
    pub fn close_from_server_final(&self, error: &str) {
        self.send_close(error, false);
    }

    fn send_close(&self, error: &str, allow_reconnect: bool) {
        if let Some(server) = self.script().server.take() {
            let _ = server.unbounded_send(HubMessage::Close {
                error: Some(error.to_string()),
                allow_reconnect,
            });
        }
    }

    /// Push a server invocation on the current link.
    pub fn push_event(&self, target: &str, payload: Value) {
        self.push_message(HubMessage::Invocation {
            invocation_id: None,
            target: target.to_string(),
            arguments: vec![payload],
        });
    }

    pub fn push_message(&self, message: HubMessage) {
        if let Some(server) = self.script().server.as_ref() {
            let _ = server.unbounded_send(message);
        }
    }
}

#[async_trait]
impl Transport for FakeHub {
    async fn connect(&self, _endpoint: &Url, token: Option<String>) -> Result<Link, HubError> {
        let (attempt, delay) = {
            let mut script = self.script();
            script.connects += 1;
            script.tokens.push(token);
            (script.connects, script.handshake_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.script().outcomes.pop_front().unwrap_or(Ok(()));
        outcome?;

        let (outbound_tx, outbound_rx) = unbounded();
        let (inbound_tx, inbound_rx) = unbounded();
        self.script().server = Some(inbound_tx.clone());
        tokio::spawn(respond(self.script.clone(), outbound_rx, inbound_tx));

        Ok(Link {
            connection_id: format!("conn-{}", attempt),
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn respond(
    script: Arc<Mutex<Script>>,
    mut outbound: UnboundedReceiver<Outbound>,
    inbound: UnboundedSender<HubMessage>,
) {
    while let Some(command) = outbound.next().await {
        match command {
            Outbound::Message(HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            }) => {
                let (fail, silent) = {
                    let mut script = script.lock().unwrap();
                    script.invocations.push((target.clone(), arguments.clone()));
                    (script.failing.contains(&target), script.silent.contains(&target))
                };
                let Some(invocation_id) = invocation_id else {
                    continue;
                };
                if silent {
                    continue;
                }
                let reply = if fail {
                    HubMessage::Completion {
                        invocation_id,
                        result: None,
                        error: Some(format!("{} rejected", target)),
                    }
                } else {
                    HubMessage::Completion {
                        invocation_id,
                        result: arguments.into_iter().next(),
                        error: None,
                    }
                };
                let _ = inbound.unbounded_send(reply);
            }
            Outbound::Message(_) => {}
            Outbound::Close(done) => {
                let _ = done.send(());
                break;
            }
        }
    }
    inbound.close_channel();
}

/// Fast backoff: 10ms, 20ms, 40ms, three attempts.
pub fn test_config() -> HubConfig {
    HubConfig::new("ws://hub.test/worldhub")
        .unwrap()
        .with_reconnect(ReconnectConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
        })
        .with_invocation_timeout(Duration::from_millis(500))
}

pub fn test_client(hub: &FakeHub) -> HubClient {
    HubClient::new(test_config(), hub.clone(), || Some("secret".to_string()))
}

/// Every event the client dispatches, in order.
pub fn record_events(client: &HubClient) -> Arc<Mutex<Vec<HubEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let record = listener(move |event| sink.lock().unwrap().push(event.clone()));
    for kind in EventKind::ALL {
        client.on(*kind, record.clone()).detach();
    }
    seen
}

pub fn kinds(events: &Arc<Mutex<Vec<HubEvent>>>) -> Vec<EventKind> {
    events.lock().unwrap().iter().map(HubEvent::kind).collect()
}

pub async fn wait_for_state(client: &HubClient, target: ConnectionState) {
    let mut changes = client.state_changes();
    tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            if *changes.borrow_and_update() == target {
                return;
            }
            changes.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("client never reached {}", target));
}

pub async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
