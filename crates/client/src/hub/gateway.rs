//! Outbound hub invocations.

use std::collections::HashMap;

use meridian_shared::{ChatScope, HubError, HubMessage};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::manager::{HubClient, Inner};

type Completion = Result<Value, String>;

/// Invocations sent on the current link that still wait for a completion.
///
/// Dropping a waiter's sender fails it with [`HubError::ConnectionLost`].
#[derive(Default)]
pub(crate) struct PendingInvocations {
    next_id: u64,
    waiting: HashMap<String, oneshot::Sender<Completion>>,
}

impl PendingInvocations {
    fn register(&mut self) -> (String, oneshot::Receiver<Completion>) {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(id.clone(), tx);
        (id, rx)
    }

    fn complete(&mut self, invocation_id: &str, outcome: Completion) -> bool {
        match self.waiting.remove(invocation_id) {
            Some(waiter) => {
                let _ = waiter.send(outcome);
                true
            }
            None => false,
        }
    }

    fn cancel(&mut self, invocation_id: &str) {
        self.waiting.remove(invocation_id);
    }

    pub(crate) fn fail_all(&mut self) {
        if !self.waiting.is_empty() {
            debug!(count = self.waiting.len(), "failing pending invocations");
        }
        self.waiting.clear();
    }

    fn len(&self) -> usize {
        self.waiting.len()
    }
}

/// Forgets the waiter when `invoke` returns or its future is dropped.
struct WaiterGuard<'a> {
    inner: &'a Inner,
    invocation_id: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.inner.lock().invocations.cancel(self.invocation_id);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    channel: ChatScope,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_id: Option<i64>,
}

impl HubClient {
    /// Call a hub method and wait for its result.
    ///
    /// Fails with [`HubError::NotConnected`] unless connected; this never
    /// starts a connection.
    pub async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, HubError> {
        let (invocation_id, completion) = {
            let mut state = self.inner.lock();
            if !state.connection().is_connected() {
                return Err(HubError::NotConnected);
            }
            let (invocation_id, completion) = state.invocations.register();
            let message = HubMessage::Invocation {
                invocation_id: Some(invocation_id.clone()),
                target: method.to_string(),
                arguments,
            };
            let sent = match state.link.as_ref() {
                Some(link) => link.send(message),
                None => Err(HubError::NotConnected),
            };
            if let Err(err) = sent {
                state.invocations.cancel(&invocation_id);
                return Err(err);
            }
            (invocation_id, completion)
        };
        debug!(method, %invocation_id, "invoking hub method");
        let _waiter = WaiterGuard {
            inner: &self.inner,
            invocation_id: &invocation_id,
        };

        match tokio::time::timeout(self.inner.config.invocation_timeout, completion).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(HubError::Invocation {
                method: method.to_string(),
                message,
            }),
            Ok(Err(_)) => Err(HubError::ConnectionLost),
            Err(_) => Err(HubError::Timeout {
                method: method.to_string(),
            }),
        }
    }

    /// Queue a hub method call without waiting for any result.
    pub fn send(&self, method: &str, arguments: Vec<Value>) -> Result<(), HubError> {
        let state = self.inner.lock();
        if !state.connection().is_connected() {
            return Err(HubError::NotConnected);
        }
        let link = state.link.as_ref().ok_or(HubError::NotConnected)?;
        trace!(method, "sending hub message");
        link.send(HubMessage::Invocation {
            invocation_id: None,
            target: method.to_string(),
            arguments,
        })
    }

    /// Direct message to another player.
    pub async fn send_message(&self, recipient_id: &str, message: &str) -> Result<(), HubError> {
        self.invoke(
            "SendMessage",
            vec![Value::from(recipient_id), Value::from(message)],
        )
        .await
        .map(|_| ())
    }

    /// Chat message to a scope; `target_id` picks the settlement, faction or
    /// player where the scope needs one.
    pub async fn send_chat_message(
        &self,
        scope: ChatScope,
        content: &str,
        target_id: Option<i64>,
    ) -> Result<(), HubError> {
        let request = serde_json::to_value(ChatRequest {
            channel: scope,
            content,
            target_id,
        })?;
        self.invoke("SendChatMessage", vec![request]).await.map(|_| ())
    }

    /// Invocations still waiting for the hub to answer.
    pub fn pending_invocations(&self) -> usize {
        self.inner.lock().invocations.len()
    }
}

impl Inner {
    pub(crate) fn complete_invocation(
        &self,
        invocation_id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let outcome = match error {
            Some(message) => Err(message),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        if !self.lock().invocations.complete(invocation_id, outcome) {
            debug!(invocation_id, "completion for unknown invocation");
        }
    }
}
