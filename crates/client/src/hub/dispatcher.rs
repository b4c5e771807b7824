//! Listener registry and event fan-out.
//!
//! Listeners are registered per [`EventKind`] with set semantics keyed by
//! `Arc` identity: registering the same `Arc` twice is one registration.
//! Delivery is synchronous with the caller and isolates panicking
//! listeners from the rest.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use meridian_shared::{EventKind, EventPayload, HubEvent};
use tracing::{error, trace};

use super::manager::{HubClient, Inner};

/// A registered callback. Identity is the `Arc` allocation.
pub type Listener = Arc<dyn Fn(&HubEvent) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener(f: impl Fn(&HubEvent) + Send + Sync + 'static) -> Listener {
    Arc::new(f)
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    // Compare the data pointers only; vtable pointers are not unique.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[derive(Default)]
pub struct EventDispatcher {
    listeners: HashMap<EventKind, Vec<Listener>>,
}

impl EventDispatcher {
    /// Returns `false` if the listener was already registered for `kind`.
    pub fn register(&mut self, kind: EventKind, listener: &Listener) -> bool {
        let entry = self.listeners.entry(kind).or_default();
        if entry.iter().any(|existing| same_listener(existing, listener)) {
            return false;
        }
        entry.push(listener.clone());
        true
    }

    /// Returns `false` if the listener was not registered for `kind`.
    pub fn unregister(&mut self, kind: EventKind, listener: &Listener) -> bool {
        let Some(entry) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|existing| !same_listener(existing, listener));
        let removed = entry.len() != before;
        if entry.is_empty() {
            self.listeners.remove(&kind);
        }
        removed
    }

    /// Snapshot of the listeners currently registered for `kind`.
    pub fn listeners_for(&self, kind: EventKind) -> Vec<Listener> {
        self.listeners.get(&kind).cloned().unwrap_or_default()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

/// Invoke every listener with `event`. A panic in one listener is logged and
/// does not stop delivery to the others.
pub fn deliver(listeners: &[Listener], event: &HubEvent) {
    trace!(event = %event.kind(), listeners = listeners.len(), "dispatching");
    for listener in listeners {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
            error!(
                event = %event.kind(),
                "listener panicked: {}",
                panic_message(panic.as_ref())
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Release handle returned by [`HubClient::on`].
///
/// Dropping it unregisters the listener. Handles obtained by registering the
/// same `Arc` more than once share that single registration.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    client: Weak<Inner>,
    kind: EventKind,
    listener: Option<Listener>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Keep the listener registered for the lifetime of the client.
    pub fn detach(mut self) {
        self.listener = None;
    }

    /// Unregister now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        if let Some(inner) = self.client.upgrade() {
            inner.lock().listeners.unregister(self.kind, &listener);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("attached", &self.listener.is_some())
            .finish()
    }
}

impl HubClient {
    /// Register `listener` for `kind`. Registering the same `Arc` again is a
    /// no-op.
    pub fn on(&self, kind: EventKind, listener: Listener) -> Subscription {
        self.inner.lock().listeners.register(kind, &listener);
        Subscription {
            client: Arc::downgrade(&self.inner),
            kind,
            listener: Some(listener),
        }
    }

    /// Register a closure for the payload type `E`.
    pub fn on_event<E>(&self, f: impl Fn(&E) + Send + Sync + 'static) -> Subscription
    where
        E: EventPayload + 'static,
    {
        self.on(
            E::KIND,
            listener(move |event| {
                if let Some(payload) = E::from_event(event) {
                    f(payload);
                }
            }),
        )
    }

    /// Unregister `listener`. Unknown listeners are ignored.
    pub fn off(&self, kind: EventKind, listener: &Listener) -> bool {
        self.inner.lock().listeners.unregister(kind, listener)
    }

    /// Deliver `event` to the listeners registered for its kind right now.
    pub fn dispatch(&self, event: &HubEvent) {
        self.inner.dispatch(event);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.lock().listeners.listener_count(kind)
    }
}

impl Inner {
    pub(crate) fn dispatch(&self, event: &HubEvent) {
        let listeners = self.lock().listeners.listeners_for(event.kind());
        deliver(&listeners, event);
    }
}
