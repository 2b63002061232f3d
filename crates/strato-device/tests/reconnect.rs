//! Reconnection tests: backoff, command handling during recovery and
//! the re-bootstrap that follows a dropped link.

use std::time::Duration;

use strato_device::{ConnectionStatus, DeviceError, RetryPolicy, Value};

mod common;
use common::*;

fn slow_retry(initial_ms: u64) -> RetryPolicy {
    let mut retry = RetryPolicy::default()
        .with_initial_delay(Duration::from_millis(initial_ms))
        .with_max_delay(Duration::from_secs(1));
    retry.add_jitter = false;
    retry
}

#[tokio::test]
async fn a_dropped_link_reconnects_and_rebootstraps() {
    init_logging();
    let recorder = Recorder::new();
    let (client, handle) =
        build_client_with_events(&[SETTINGS_JSON, SERVER_SETTINGS_JSON], recorder.clone()).await;
    client.connect().await.unwrap();
    handle.clear_recorded().await;

    handle.drop_link("tcp reset").await;
    wait_for_attempts(&handle, 2).await;
    wait_for_status(&client, ConnectionStatus::Connected).await;
    settle().await;

    assert_eq!(handle.connect_attempts().await, 2);

    // The whole bootstrap ran again: subscriptions and introspection.
    let subs = handle.subscriptions().await;
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0].topic, control_topic("consumer/properties"));
    let intro = handle.publishes_to(&base_topic()).await;
    assert_eq!(intro.len(), 1);

    let events = recorder.events();
    assert_eq!(
        events[events.len() - 2..],
        [
            Recorded::Disconnected {
                reason: "tcp reset".to_string()
            },
            Recorded::Connected {
                session_present: false
            }
        ]
    );
}

#[tokio::test]
async fn reconnect_retries_until_the_link_holds() {
    init_logging();
    let (client, handle) = connected_client(&[SETTINGS_JSON]).await;

    handle.fail_next_connects(2).await;
    handle.drop_link("broker went away").await;
    wait_for_attempts(&handle, 4).await;
    wait_for_status(&client, ConnectionStatus::Connected).await;

    // initial connect + two failed attempts + the one that held
    assert_eq!(handle.connect_attempts().await, 4);
}

#[tokio::test]
async fn status_reports_reconnecting_during_backoff() {
    init_logging();
    let config = test_config().with_retry(slow_retry(300));
    let (client, handle) = build_with_config(config, &[SETTINGS_JSON], None).await;
    client.connect().await.unwrap();

    handle.drop_link("tcp reset").await;
    settle().await;
    assert_eq!(client.status().await, ConnectionStatus::Reconnecting);

    wait_for_status(&client, ConnectionStatus::Connected).await;
}

#[tokio::test]
async fn disconnect_cancels_a_pending_reconnect() {
    init_logging();
    let config = test_config().with_retry(slow_retry(500));
    let (client, handle) = build_with_config(config, &[SETTINGS_JSON], None).await;
    client.connect().await.unwrap();

    handle.drop_link("tcp reset").await;
    settle().await;
    assert_eq!(client.status().await, ConnectionStatus::Reconnecting);

    client.disconnect().await.unwrap();
    assert_eq!(client.status().await, ConnectionStatus::Disconnected);

    // The pending attempt never fires.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(handle.connect_attempts().await, 1);
    assert_eq!(client.status().await, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn connect_during_a_reconnect_is_a_no_op() {
    init_logging();
    let config = test_config().with_retry(slow_retry(200));
    let (client, handle) = build_with_config(config, &[SETTINGS_JSON], None).await;
    client.connect().await.unwrap();

    handle.drop_link("tcp reset").await;
    settle().await;
    assert_eq!(client.status().await, ConnectionStatus::Reconnecting);

    // Answered immediately; the running recovery is the connection.
    client.connect().await.unwrap();

    wait_for_status(&client, ConnectionStatus::Connected).await;
    assert_eq!(handle.connect_attempts().await, 2);
}

#[tokio::test]
async fn nothing_sent_while_offline_is_replayed() {
    init_logging();
    let config = test_config().with_retry(slow_retry(300));
    let (client, handle) = build_with_config(config, &[READINGS_JSON], None).await;
    client.connect().await.unwrap();
    handle.clear_recorded().await;

    handle.drop_link("tcp reset").await;
    settle().await;
    assert_eq!(client.status().await, ConnectionStatus::Reconnecting);

    let err = client
        .send("org.demo.Readings", "/value", Value::Double(1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Disconnected));

    wait_for_status(&client, ConnectionStatus::Connected).await;

    // The rejected send stays rejected; only the bootstrap was published.
    assert!(handle
        .publishes_to(&data_topic("org.demo.Readings", "/value"))
        .await
        .is_empty());
}

#[tokio::test]
async fn interface_changes_apply_during_a_reconnect() {
    init_logging();
    let config = test_config().with_retry(slow_retry(300));
    let (client, handle) = build_with_config(config, &[READINGS_JSON], None).await;
    client.connect().await.unwrap();
    handle.clear_recorded().await;

    handle.drop_link("tcp reset").await;
    settle().await;
    assert_eq!(client.status().await, ConnectionStatus::Reconnecting);

    // Mutates the registry now; the next bootstrap announces it.
    client.add_interface_json(SERVER_SETTINGS_JSON).await.unwrap();

    wait_for_status(&client, ConnectionStatus::Connected).await;

    let intro = handle.publishes_to(&base_topic()).await;
    assert_eq!(intro.len(), 1);
    assert_eq!(
        intro[0].payload,
        b"org.demo.Readings:1:0,org.demo.ServerSettings:1:0".to_vec()
    );
    // The new server interface was subscribed by the bootstrap.
    assert!(handle
        .subscriptions()
        .await
        .iter()
        .any(|s| s.topic == format!("{}/org.demo.ServerSettings/#", base_topic())));
}
