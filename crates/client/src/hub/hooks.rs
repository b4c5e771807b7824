//! Dioxus hooks binding component lifecycles to the hub.
//!
//! The [`HubClient`] is expected in context (`use_context_provider` at the
//! application root). Subscriptions and channel memberships taken here are
//! released when the component unmounts.

use std::cell::RefCell;
use std::rc::Rc;

use dioxus::core::spawn_forever;
use dioxus::prelude::*;
use futures_channel::mpsc::unbounded;
use futures_util::StreamExt;
use meridian_shared::EventPayload;
use tracing::warn;

use super::{ChannelId, ConnectionState, HubClient};

/// Run `handler` on the UI task for every `E` event while the component is
/// mounted.
///
/// The handler captured on the first render is kept for the component's
/// lifetime.
pub fn use_hub_event<E>(mut handler: impl FnMut(E) + 'static)
where
    E: EventPayload + Clone + Send + 'static,
{
    let client = use_context::<HubClient>();
    use_hook(move || {
        let (tx, mut rx) = unbounded::<E>();
        let subscription = client.on_event(move |payload: &E| {
            let _ = tx.unbounded_send(payload.clone());
        });
        // The task owns the subscription; unmount cancels the task and drops it.
        spawn(async move {
            let _subscription = subscription;
            while let Some(payload) = rx.next().await {
                handler(payload);
            }
        });
    });
}

/// Current connection state as a signal, updated from the client's state watch.
pub fn use_connection_state() -> Signal<ConnectionState> {
    let client = use_context::<HubClient>();
    let mut state = use_signal(|| client.state());
    use_hook(move || {
        let mut changes = client.state_changes();
        spawn(async move {
            while changes.changed().await.is_ok() {
                let current = *changes.borrow_and_update();
                state.set(current);
            }
        });
    });
    state
}

/// Keep the component joined to `channel`.
///
/// Switching to another channel leaves the previous one; `None` leaves
/// without joining. Unmounting leaves the current channel.
pub fn use_channel(channel: Option<ChannelId>) {
    let client = use_context::<HubClient>();
    let active: Rc<RefCell<Option<ChannelId>>> = use_hook(|| Rc::new(RefCell::new(None)));

    if *active.borrow() != channel {
        let previous = active.replace(channel.clone());
        let hub = client.clone();
        spawn(async move {
            if let Some(previous) = previous {
                if let Err(err) = hub.leave_channel(previous.clone()).await {
                    warn!(channel = %previous, error = %err, "failed to leave channel");
                }
            }
            if let Some(next) = channel {
                if let Err(err) = hub.join_channel(next.clone()).await {
                    warn!(channel = %next, error = %err, "failed to join channel");
                }
            }
        });
    }

    let mounted = active.clone();
    use_drop(move || {
        if let Some(channel) = mounted.take() {
            // Outlives the component so the leave is still sent.
            spawn_forever(async move {
                if let Err(err) = client.leave_channel(channel.clone()).await {
                    warn!(%channel, error = %err, "failed to leave channel");
                }
            });
        }
    });
}
