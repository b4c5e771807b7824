mod common;

use common::*;
use meridian_client::hub::ConnectionState;
use meridian_client::{ChannelId, HubError};
use serde_json::json;

#[tokio::test]
async fn join_connects_first_and_is_idempotent() {
    let hub = FakeHub::new();
    let client = test_client(&hub);

    client.join_channel(ChannelId::settlement(42)).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(hub.connects(), 1);
    assert_eq!(hub.calls_to("JoinSettlementChannel"), vec![json!("42")]);

    client.join_channel("settlement:42").await.unwrap();
    assert_eq!(client.channels(), vec![ChannelId::settlement(42)]);
    assert!(client.is_member(&ChannelId::settlement(42)));
}

#[tokio::test]
async fn join_fails_when_the_connection_cannot_be_made() {
    let hub = FakeHub::new();
    hub.refuse_next(1);
    let client = test_client(&hub);

    let err = client.join_channel("lobby").await.unwrap_err();
    assert!(matches!(err, HubError::Handshake(_)));
    assert!(client.channels().is_empty());
    assert!(hub.invocations().is_empty());
}

#[tokio::test]
async fn rejected_join_is_not_remembered() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    client.start().await.unwrap();
    hub.fail_method("JoinWorldChannel");

    let err = client.join_channel(ChannelId::world(1)).await.unwrap_err();
    match err {
        HubError::Invocation { method, message } => {
            assert_eq!(method, "JoinWorldChannel");
            assert_eq!(message, "JoinWorldChannel rejected");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!client.is_member(&ChannelId::world(1)));
}

#[tokio::test]
async fn leave_forgets_the_channel_even_if_the_hub_refuses() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    client.join_channel("lobby").await.unwrap();
    hub.fail_method("LeaveChannel");

    let err = client.leave_channel("lobby").await.unwrap_err();
    assert!(matches!(err, HubError::Invocation { .. }));
    assert!(!client.is_member(&ChannelId::from("lobby")));
    assert_eq!(hub.calls_to("LeaveChannel"), vec![json!("lobby")]);
}

#[tokio::test]
async fn leave_while_disconnected_is_local_only() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    client.join_channel(ChannelId::character("c-9")).await.unwrap();
    client.stop().await;
    hub.clear_invocations();

    client.leave_channel(ChannelId::character("c-9")).await.unwrap();

    assert!(client.channels().is_empty());
    assert!(hub.invocations().is_empty());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn leaving_an_unknown_channel_still_calls_the_hub() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    client.start().await.unwrap();

    client.leave_channel(ChannelId::world(5)).await.unwrap();
    assert_eq!(hub.calls_to("LeaveWorldChannel"), vec![json!("5")]);
}

#[tokio::test]
async fn cleared_channels_are_not_replayed() {
    let hub = FakeHub::new();
    let client = test_client(&hub);
    client.join_channel("lobby").await.unwrap();
    client.clear_channels();
    hub.clear_invocations();

    hub.drop_connection();
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    wait_for_state(&client, ConnectionState::Connected).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    assert!(hub.invocations().is_empty());
}
