//! Server-pushed events and listener management.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::*;
use meridian_client::hub::{listener, ConnectionState};
use meridian_client::shared::{CharacterHealthChanged, Connected};
use meridian_client::{EventKind, HubEvent};
use serde_json::json;

fn health(character_id: &str, health: i64) -> serde_json::Value {
    json!({ "characterId": character_id, "health": health, "maxHealth": 100 })
}

#[tokio::test]
async fn typed_listeners_receive_payloads() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    client.start().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = client.on_event(move |changed: &CharacterHealthChanged| {
        sink.lock().unwrap().push((changed.character_id.clone(), changed.health));
    });

    hub.push_event("CharacterHealthChanged", health("c-1", 80));
    hub.push_event("CharacterHealthChanged", health("c-1", 55));

    eventually(|| seen.lock().unwrap().len() == 2).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("c-1".to_string(), 80), ("c-1".to_string(), 55)]
    );
}

#[tokio::test]
async fn unknown_reserved_and_malformed_invocations_are_dropped() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    let events = record_events(&client);
    client.start().await.unwrap();

    hub.push_event("NoSuchEvent", json!({ "x": 1 }));
    hub.push_event("Connected", json!({ "connectionId": "spoofed" }));
    hub.push_event("CharacterHealthChanged", json!({ "nope": true }));
    hub.push_event("CharacterHealthChanged", health("c-2", 10));

    eventually(|| events.lock().unwrap().len() == 2).await;
    assert_eq!(
        kinds(&events),
        vec![EventKind::Connected, EventKind::CharacterHealthChanged]
    );
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn dropping_the_subscription_unregisters() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let sub = client.on_event(move |_: &Connected| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(client.listener_count(EventKind::Connected), 1);
    drop(sub);
    assert_eq!(client.listener_count(EventKind::Connected), 0);

    client.start().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn same_listener_twice_is_one_registration() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let cb = listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let first = client.on(EventKind::Connected, cb.clone());
    let second = client.on(EventKind::Connected, cb.clone());
    assert_eq!(client.listener_count(EventKind::Connected), 1);

    client.start().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(client.off(EventKind::Connected, &cb));
    assert!(!client.off(EventKind::Connected, &cb));
    drop(first);
    drop(second);
    assert_eq!(client.listener_count(EventKind::Connected), 0);
}

#[tokio::test]
async fn detached_listener_outlives_its_handle() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    client
        .on_event(move |_: &Connected| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .detach();

    client.start().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_listener_does_not_starve_the_others() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let _boom = client.on(EventKind::Connected, listener(|_| panic!("listener bug")));
    let _count = client.on(
        EventKind::Connected,
        listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    client.start().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn listeners_may_unsubscribe_while_being_called() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    let slot: Arc<Mutex<Option<meridian_client::Subscription>>> = Arc::new(Mutex::new(None));

    let release = slot.clone();
    let sub = client.on(
        EventKind::Connected,
        listener(move |_| {
            release.lock().unwrap().take();
        }),
    );
    *slot.lock().unwrap() = Some(sub);

    client.dispatch(&HubEvent::Connected(Connected {
        connection_id: "local".to_string(),
    }));
    assert_eq!(client.listener_count(EventKind::Connected), 0);
}
