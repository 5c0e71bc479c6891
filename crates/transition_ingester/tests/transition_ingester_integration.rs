#![cfg(feature = "integration-tests")]

use async_trait::async_trait;
use common::domain::{DomainResult, GeofenceEvent, GeofenceEventRepository};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::mosquitto::Mosquitto;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use transition_ingester::mqtt::MqttConnectionConfig;
use transition_ingester::{TransitionIngester, TransitionIngesterConfig};

#[derive(Default)]
struct RecordingRepository {
    events: Mutex<Vec<GeofenceEvent>>,
    /// How long each insert takes
    delay: Duration,
    insert_started: Notify,
}

impl RecordingRepository {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

#[async_trait]
impl GeofenceEventRepository for RecordingRepository {
    async fn insert_event(&self, event: &GeofenceEvent) -> DomainResult<()> {
        self.insert_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

async fn start_broker() -> (ContainerAsync<Mosquitto>, String, u16) {
    let mosquitto = Mosquitto::default().start().await.unwrap();
    let host = mosquitto.get_host().await.unwrap().to_string();
    let port = mosquitto.get_host_port_ipv4(1883).await.unwrap();
    (mosquitto, host, port)
}

fn ingester_config(host: &str, port: u16) -> TransitionIngesterConfig {
    TransitionIngesterConfig {
        mqtt: MqttConnectionConfig {
            broker_url: format!("mqtt://{}:{}", host, port),
            client_id: "trackbox-ingester-test".to_string(),
            ..Default::default()
        },
        subscribe_topic: "owntracks/+/+/event".to_string(),
        subscribe_qos: 2,
        reconnect_delay_secs: 1,
        notification_topic_prefix: "trackbox".to_string(),
        notification_timeout_ms: 5000,
        shutdown_drain_timeout_secs: 5,
    }
}

/// Drives a test client's event loop, forwarding received publishes
fn spawn_event_loop(mut eventloop: EventLoop) -> mpsc::UnboundedReceiver<(String, Vec<u8>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let _ = tx.send((publish.topic.clone(), publish.payload.to_vec()));
                }
                Ok(_) => {}
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    });
    rx
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_transition_is_stored_and_announced() {
    let (_container, host, port) = start_broker().await;
    let repository = Arc::new(RecordingRepository::default());

    let ingester = TransitionIngester::new(repository.clone(), ingester_config(&host, port)).unwrap();
    let token = CancellationToken::new();
    let process = ingester.into_runner_process();
    let handle = tokio::spawn(process(token.clone()));

    let (watcher, watcher_loop) =
        AsyncClient::new(MqttOptions::new("trackbox-watcher", host.clone(), port), 10);
    let mut notifications = spawn_event_loop(watcher_loop);
    watcher
        .subscribe("trackbox/+/events", QoS::AtLeastOnce)
        .await
        .unwrap();

    // Give both subscriptions time to reach the broker
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (publisher, publisher_loop) =
        AsyncClient::new(MqttOptions::new("trackbox-tracker", host.clone(), port), 10);
    let _ = spawn_event_loop(publisher_loop);
    publisher
        .publish(
            "owntracks/alice/phone1/event",
            QoS::AtLeastOnce,
            false,
            r#"{"_type":"transition","tst":1700000000,"desc":"home","event":"enter"}"#,
        )
        .await
        .unwrap();

    let (topic, payload) = tokio::time::timeout(Duration::from_secs(10), notifications.recv())
        .await
        .expect("notification should arrive")
        .unwrap();
    assert_eq!(topic, "trackbox/alice/events");
    assert_eq!(payload, b"geofence");

    {
        let events = repository.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "enter");
        assert_eq!(events[0].entity_id, "alice");
        assert_eq!(events[0].target_entity_id, "home");
        assert_eq!(events[0].event_time.timestamp(), 1_700_000_000);
    }

    token.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("ingester should stop after cancellation")
        .unwrap()
        .unwrap();
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_non_transition_messages_are_ignored() {
    let (_container, host, port) = start_broker().await;
    let repository = Arc::new(RecordingRepository::default());

    let ingester = TransitionIngester::new(repository.clone(), ingester_config(&host, port)).unwrap();
    let token = CancellationToken::new();
    let handle = tokio::spawn(ingester.into_runner_process()(token.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;

    let (publisher, publisher_loop) =
        AsyncClient::new(MqttOptions::new("trackbox-tracker", host.clone(), port), 10);
    let _ = spawn_event_loop(publisher_loop);
    publisher
        .publish(
            "owntracks/alice/phone1/event",
            QoS::AtLeastOnce,
            false,
            r#"{"_type":"location","tst":1700000000,"lat":52.1,"lon":4.3}"#,
        )
        .await
        .unwrap();
    publisher
        .publish("owntracks/alice/phone1/event", QoS::AtLeastOnce, false, "not json")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(repository.events.lock().unwrap().is_empty());

    token.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("ingester should stop after cancellation")
        .unwrap()
        .unwrap();
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_shutdown_finishes_in_flight_run() {
    let (_container, host, port) = start_broker().await;
    let repository = Arc::new(RecordingRepository::slow(Duration::from_secs(2)));

    let ingester = TransitionIngester::new(repository.clone(), ingester_config(&host, port)).unwrap();
    let token = CancellationToken::new();
    let handle = tokio::spawn(ingester.into_runner_process()(token.clone()));

    let (watcher, watcher_loop) =
        AsyncClient::new(MqttOptions::new("trackbox-watcher", host.clone(), port), 10);
    let mut notifications = spawn_event_loop(watcher_loop);
    watcher
        .subscribe("trackbox/+/events", QoS::AtLeastOnce)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let (publisher, publisher_loop) =
        AsyncClient::new(MqttOptions::new("trackbox-tracker", host.clone(), port), 10);
    let _ = spawn_event_loop(publisher_loop);
    publisher
        .publish(
            "owntracks/alice/phone1/event",
            QoS::AtLeastOnce,
            false,
            r#"{"_type":"transition","tst":1700000000,"desc":"home","event":"enter"}"#,
        )
        .await
        .unwrap();

    // Shut down while the insert is still sleeping
    tokio::time::timeout(Duration::from_secs(10), repository.insert_started.notified())
        .await
        .expect("insert should start");
    token.cancel();

    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("ingester should stop after draining")
        .unwrap()
        .unwrap();

    // The run completed before the process returned
    assert_eq!(repository.events.lock().unwrap().len(), 1);

    // Its notification was acknowledged by the broker, so the watcher gets it
    let (topic, payload) = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("notification should have been flushed during shutdown")
        .unwrap();
    assert_eq!(topic, "trackbox/alice/events");
    assert_eq!(payload, b"geofence");
}
