//! Property state tests: set/unset round trips, persistence rules,
//! incoming server properties and the purge control message.

use strato_device::{payload, DeviceError, ReceivedData, Value};

mod common;
use common::*;

#[tokio::test]
async fn datastream_sends_leave_no_stored_state() {
    let (client, handle) = connected_client(&[READINGS_JSON]).await;
    handle.clear_recorded().await;

    client
        .send("org.demo.Readings", "/value", Value::Double(21.5))
        .await
        .unwrap();

    assert_eq!(handle.publishes().await.len(), 1);
    assert!(client
        .interface_properties("org.demo.Readings")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn property_set_persists_and_publishes() {
    let (client, handle) = connected_client(&[SETTINGS_JSON]).await;
    handle.clear_recorded().await;

    client
        .send("org.demo.Settings", "/enabled", Value::Boolean(true))
        .await
        .unwrap();

    assert_eq!(
        client.property("org.demo.Settings", "/enabled").await.unwrap(),
        Some(Value::Boolean(true))
    );

    let pubs = handle.publishes_to(&data_topic("org.demo.Settings", "/enabled")).await;
    assert_eq!(pubs.len(), 1);
    assert_eq!(pubs[0].qos, 2);
    assert!(!pubs[0].payload.is_empty());
}

#[tokio::test]
async fn unset_clears_the_stored_value() {
    let (client, handle) = connected_client(&[SETTINGS_JSON]).await;

    client
        .send("org.demo.Settings", "/enabled", Value::Boolean(true))
        .await
        .unwrap();
    handle.clear_recorded().await;

    client
        .unset_property("org.demo.Settings", "/enabled")
        .await
        .unwrap();

    assert_eq!(
        client.property("org.demo.Settings", "/enabled").await.unwrap(),
        None
    );

    // The unset goes out as a zero-length payload.
    let pubs = handle.publishes_to(&data_topic("org.demo.Settings", "/enabled")).await;
    assert_eq!(pubs.len(), 1);
    assert!(pubs[0].payload.is_empty());
    assert_eq!(pubs[0].qos, 2);
}

#[tokio::test]
async fn unset_requires_allow_unset() {
    let (client, handle) = connected_client(&[SETTINGS_JSON]).await;

    client
        .send("org.demo.Settings", "/name", Value::String("probe-7".into()))
        .await
        .unwrap();
    handle.clear_recorded().await;

    let err = client
        .unset_property("org.demo.Settings", "/name")
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Interface(_)));

    // Rejected locally: still stored, nothing published.
    assert_eq!(
        client.property("org.demo.Settings", "/name").await.unwrap(),
        Some(Value::String("probe-7".into()))
    );
    assert!(handle.publishes().await.is_empty());
}

#[tokio::test]
async fn false_is_a_value_not_an_unset() {
    let (client, _handle) = connected_client(&[SETTINGS_JSON]).await;

    client
        .send("org.demo.Settings", "/enabled", Value::Boolean(true))
        .await
        .unwrap();
    client
        .send("org.demo.Settings", "/enabled", Value::Boolean(false))
        .await
        .unwrap();

    assert_eq!(
        client.property("org.demo.Settings", "/enabled").await.unwrap(),
        Some(Value::Boolean(false))
    );
}

#[tokio::test]
async fn repeated_sets_keep_one_entry_and_still_publish() {
    let (client, handle) = connected_client(&[SETTINGS_JSON]).await;
    handle.clear_recorded().await;

    for _ in 0..3 {
        client
            .send("org.demo.Settings", "/enabled", Value::Boolean(true))
            .await
            .unwrap();
    }

    // State converges to one entry; every set is still announced.
    let stored = client.interface_properties("org.demo.Settings").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(
        handle.publishes_to(&data_topic("org.demo.Settings", "/enabled")).await.len(),
        3
    );
}

#[tokio::test]
async fn server_properties_are_stored_and_unset_on_empty_payloads() {
    let recorder = Recorder::new();
    let (client, handle) =
        build_client_with_events(&[SERVER_SETTINGS_JSON], recorder.clone()).await;
    client.connect().await.unwrap();

    let topic = data_topic("org.demo.ServerSettings", "/mode");
    let bytes = payload::encode_individual(&Value::String("eco".into()), None).unwrap();
    assert!(handle.push_message(&topic, bytes).await);
    settle().await;

    assert_eq!(
        client.property("org.demo.ServerSettings", "/mode").await.unwrap(),
        Some(Value::String("eco".into()))
    );

    assert!(handle.push_message(&topic, Vec::new()).await);
    settle().await;

    assert_eq!(
        client.property("org.demo.ServerSettings", "/mode").await.unwrap(),
        None
    );

    let data = recorder.data_events();
    assert_eq!(data.len(), 2);
    assert_eq!(
        data[1],
        Recorded::Data {
            interface: "org.demo.ServerSettings".to_string(),
            path: "/mode".to_string(),
            data: ReceivedData::Unset,
            timestamp: None,
        }
    );
}

#[tokio::test]
async fn stale_major_versions_are_evicted_on_read() {
    let (client, _handle) = connected_client(&[SETTINGS_JSON]).await;

    // An entry left behind by an older contract generation.
    client
        .property_store()
        .store("org.demo.Settings", "/enabled", &Value::Boolean(true), 0)
        .unwrap();

    assert_eq!(
        client.property("org.demo.Settings", "/enabled").await.unwrap(),
        None
    );
    assert!(client
        .interface_properties("org.demo.Settings")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn purge_evicts_server_properties_missing_from_the_consumer_set() {
    let (client, handle) =
        connected_client(&[SERVER_SETTINGS_JSON, SETTINGS_JSON]).await;

    // Two server properties and one of our own.
    let mode = payload::encode_individual(&Value::String("eco".into()), None).unwrap();
    handle
        .push_message(&data_topic("org.demo.ServerSettings", "/mode"), mode)
        .await;
    let limit = payload::encode_individual(&Value::Integer(5), None).unwrap();
    handle
        .push_message(&data_topic("org.demo.ServerSettings", "/limit"), limit)
        .await;
    client
        .send("org.demo.Settings", "/enabled", Value::Boolean(true))
        .await
        .unwrap();
    settle().await;

    // The broker claims it only holds /mode.
    handle
        .push_message(
            &control_topic("consumer/properties"),
            b"org.demo.ServerSettings/mode".to_vec(),
        )
        .await;
    settle().await;

    assert_eq!(
        client.property("org.demo.ServerSettings", "/mode").await.unwrap(),
        Some(Value::String("eco".into()))
    );
    assert_eq!(
        client.property("org.demo.ServerSettings", "/limit").await.unwrap(),
        None
    );
    // Device-owned state is not the broker's to purge.
    assert_eq!(
        client.property("org.demo.Settings", "/enabled").await.unwrap(),
        Some(Value::Boolean(true))
    );
}

#[tokio::test]
async fn clean_sessions_flush_stored_device_properties() {
    let (client, handle) = connected_client(&[SETTINGS_JSON]).await;

    client
        .send("org.demo.Settings", "/enabled", Value::Boolean(true))
        .await
        .unwrap();
    client.disconnect().await.unwrap();
    handle.clear_recorded().await;

    client.connect().await.unwrap();

    // The stored property is republished and announced.
    let flushed = handle.publishes_to(&data_topic("org.demo.Settings", "/enabled")).await;
    assert_eq!(flushed.len(), 1);
    let envelope = payload::decode_envelope(&flushed[0].payload).unwrap();
    assert_eq!(envelope.timestamp, None);

    let announced = handle.publishes_to(&control_topic("producer/properties")).await;
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].payload, b"org.demo.Settings/enabled".to_vec());
}
