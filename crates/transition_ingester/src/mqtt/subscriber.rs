use crate::domain::{DiscardReason, InboundMessage, RunOutcome, TransitionIngestionService};
use crate::mqtt::PublishAcks;
use common::domain::DomainError;
use rumqttc::{
    AsyncClient, Event, EventLoop, Outgoing, Packet, Publish, QoS, SubscribeReasonCode,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

#[derive(Debug, Clone)]
pub struct MqttSubscriberConfig {
    /// Topic filter, e.g. `owntracks/+/+/event`
    pub subscribe_topic: String,
    pub qos: QoS,
    /// Pause before polling again after a connection error
    pub reconnect_delay: Duration,
    /// How long in-flight messages may take to finish on shutdown
    pub drain_timeout: Duration,
}

/// Drives the MQTT event loop and dispatches inbound messages to the
/// ingestion service
///
/// Each message is processed on its own task, so slow writes for one subject
/// do not hold up others. A message is acknowledged to the broker once its run
/// has finished, whatever the outcome, and acknowledgements go out in the
/// order the messages arrived.
///
/// Every event is also fed to `acks`, which completes the QoS 1 notifications
/// published through the same client.
pub struct MqttSubscriber {
    client: AsyncClient,
    eventloop: EventLoop,
    service: Arc<TransitionIngestionService>,
    acks: PublishAcks,
    config: MqttSubscriberConfig,
    tracker: TaskTracker,
}

/// A received message waiting for its run to finish before being acked
type PendingAck = (Publish, oneshot::Receiver<()>);

impl MqttSubscriber {
    pub fn new(
        client: AsyncClient,
        eventloop: EventLoop,
        service: Arc<TransitionIngestionService>,
        acks: PublishAcks,
        config: MqttSubscriberConfig,
    ) -> Self {
        Self {
            client,
            eventloop,
            service,
            acks,
            config,
            tracker: TaskTracker::new(),
        }
    }

    /// Run until cancelled, then drain in-flight messages and disconnect
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        let MqttSubscriber {
            client,
            mut eventloop,
            service,
            acks,
            config,
            tracker,
        } = self;

        info!(topic = %config.subscribe_topic, "starting MQTT subscriber");

        let (ack_tx, ack_rx) = mpsc::unbounded_channel::<PendingAck>();
        let ack_client = client.clone();
        tracker.spawn(ack_in_arrival_order(ack_rx, move |publish| {
            let client = ack_client.clone();
            async move {
                if let Err(e) = client.ack(&publish).await {
                    warn!(error = %e, message_id = publish.pkid, "failed to acknowledge MQTT message");
                }
            }
        }));

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("shutdown signal received");
                    break;
                }
                event = eventloop.poll() => match event {
                    Ok(event) => handle_event(&event, &client, &acks, &config, |publish| {
                        dispatch(&tracker, &ack_tx, &service, publish);
                    }),
                    Err(e) => {
                        warn!(
                            error = %e,
                            retry_in = ?config.reconnect_delay,
                            "MQTT connection error, reconnecting"
                        );
                        tokio::select! {
                            _ = ctx.cancelled() => break,
                            _ = tokio::time::sleep(config.reconnect_delay) => {}
                        }
                    }
                },
            }
        }

        // Closing the ack queue lets the ack task finish once it has drained
        drop(ack_tx);
        shutdown(client, eventloop, tracker, &acks, &config).await;

        info!("MQTT subscriber stopped");
        Ok(())
    }
}

/// React to one event loop event; inbound publishes go to `on_publish`
fn handle_event(
    event: &Event,
    client: &AsyncClient,
    acks: &PublishAcks,
    config: &MqttSubscriberConfig,
    on_publish: impl FnOnce(Publish),
) {
    acks.observe(event);

    match event {
        Event::Incoming(Packet::Publish(publish)) => on_publish(publish.clone()),
        Event::Incoming(Packet::ConnAck(connack)) => {
            info!(session_present = connack.session_present, "connected to MQTT broker");
            // Clean sessions lose their subscriptions, so subscribe on every connect
            if let Err(e) = client.try_subscribe(&config.subscribe_topic, config.qos) {
                error!(error = %e, topic = %config.subscribe_topic, "failed to queue subscription");
            }
        }
        Event::Incoming(Packet::SubAck(suback)) => {
            if suback
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure))
            {
                error!(topic = %config.subscribe_topic, "broker rejected subscription");
            } else {
                info!(topic = %config.subscribe_topic, "subscribed to MQTT topic");
            }
        }
        _ => {}
    }
}

/// Spawn a pipeline run for one inbound publish and queue its ack
fn dispatch(
    tracker: &TaskTracker,
    ack_tx: &mpsc::UnboundedSender<PendingAck>,
    service: &Arc<TransitionIngestionService>,
    publish: Publish,
) {
    let (done_tx, done_rx) = oneshot::channel();
    let message = InboundMessage {
        topic: publish.topic.clone(),
        payload: publish.payload.clone(),
        duplicate: publish.dup,
        message_id: publish.pkid,
    };

    if ack_tx.send((publish, done_rx)).is_err() {
        warn!(message_id = message.message_id, "ack queue closed, message will be redelivered");
    }

    let service = Arc::clone(service);
    tracker.spawn(async move {
        handle_mqtt_message(&service, &message).await;
        let _ = done_tx.send(());
    });
}

/// Acknowledge messages in arrival order, each once its run has finished
///
/// Runs complete in any order; a finished run waits here until every message
/// that arrived before it has been acknowledged.
async fn ack_in_arrival_order<F, Fut>(mut pending: mpsc::UnboundedReceiver<PendingAck>, mut ack: F)
where
    F: FnMut(Publish) -> Fut,
    Fut: Future<Output = ()>,
{
    while let Some((publish, done)) = pending.recv().await {
        // A run that panicked still counts as finished
        let _ = done.await;
        ack(publish).await;
    }
}

/// Process one message in its own trace and log how it ended
pub(crate) async fn handle_mqtt_message(
    service: &TransitionIngestionService,
    message: &InboundMessage,
) {
    let span = info_span!(
        parent: Span::none(),
        "mqtt_message",
        topic = %message.topic,
        message_id = message.message_id,
        duplicate = message.duplicate,
        payload_size = message.payload.len(),
    );

    async {
        debug!(payload = %String::from_utf8_lossy(&message.payload), "received MQTT message");

        match service.process_message(message).await {
            Ok(RunOutcome::Persisted { notified: true }) => {
                info!("stored geofence event");
            }
            Ok(RunOutcome::Persisted { notified: false }) => {
                info!("stored geofence event without change notification");
            }
            Ok(RunOutcome::Discarded(DiscardReason::Duplicate)) => {
                info!("discarded duplicate delivery");
            }
            Ok(RunOutcome::Discarded(DiscardReason::NotTransition { message_type })) => {
                info!(message_type = %message_type, "discarded non-transition message");
            }
            Err(e @ DomainError::RepositoryError(_)) => {
                error!(error = %e, "failed to store geofence event");
            }
            Err(e) => {
                warn!(error = %e, "discarding invalid MQTT message");
            }
        }
    }
    .instrument(span)
    .await
}

/// Stop taking new work, let in-flight runs finish, then disconnect
///
/// The event loop keeps being polled while draining so that notifications
/// and acknowledgements queued by the remaining runs reach the broker.
async fn shutdown(
    client: AsyncClient,
    mut eventloop: EventLoop,
    tracker: TaskTracker,
    acks: &PublishAcks,
    config: &MqttSubscriberConfig,
) {
    tracker.close();
    if let Err(e) = client.try_unsubscribe(&config.subscribe_topic) {
        debug!(error = %e, "failed to queue unsubscribe");
    }

    info!(in_flight = tracker.len(), "draining in-flight MQTT messages");

    let drained = tokio::time::timeout(config.drain_timeout, async {
        loop {
            tokio::select! {
                _ = tracker.wait() => return,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, "shutting down, leaving message for redelivery");
                    }
                    // Remaining runs still wait on PUBACKs for their notifications
                    Ok(event) => acks.observe(&event),
                    Err(e) => {
                        warn!(error = %e, "MQTT connection lost while draining");
                        tracker.wait().await;
                        return;
                    }
                },
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            timeout = ?config.drain_timeout,
            remaining = tracker.len(),
            "timed out waiting for in-flight MQTT messages"
        );
    }

    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "failed to queue disconnect");
        return;
    }

    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::domain::{MockChangeNotifier, MockGeofenceEventRepository};
    use rumqttc::MqttOptions;
    use std::sync::Mutex;

    fn service(
        repository: MockGeofenceEventRepository,
        notifier: MockChangeNotifier,
    ) -> Arc<TransitionIngestionService> {
        Arc::new(TransitionIngestionService::new(
            Arc::new(repository),
            Arc::new(notifier),
        ))
    }

    fn message(topic: &str, payload: &'static str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
            duplicate: false,
            message_id: 1,
        }
    }

    #[tokio::test]
    async fn test_handle_mqtt_message_success() {
        let mut mock_repository = MockGeofenceEventRepository::new();
        let mut mock_notifier = MockChangeNotifier::new();
        mock_repository
            .expect_insert_event()
            .times(1)
            .returning(|_| Ok(()));
        mock_notifier
            .expect_notify_change()
            .withf(|subject_id: &str| subject_id == "alice")
            .times(1)
            .returning(|_| Ok(()));

        handle_mqtt_message(
            &service(mock_repository, mock_notifier),
            &message(
                "owntracks/alice/phone1/event",
                r#"{"_type":"transition","tst":1700000000,"desc":"home","event":"enter"}"#,
            ),
        )
        .await;
    }

    #[tokio::test]
    async fn test_handle_mqtt_message_invalid_payload() {
        let mut mock_repository = MockGeofenceEventRepository::new();
        mock_repository.expect_insert_event().times(0);

        handle_mqtt_message(
            &service(mock_repository, MockChangeNotifier::new()),
            &message("owntracks/alice/phone1/event", "not json"),
        )
        .await;
    }

    fn publish(pkid: u16) -> Publish {
        let mut publish = Publish::new("owntracks/alice/phone1/event", QoS::AtLeastOnce, "{}");
        publish.pkid = pkid;
        publish
    }

    #[tokio::test]
    async fn test_acks_follow_arrival_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let acked = Arc::new(Mutex::new(Vec::new()));

        let (first_done, first_rx) = oneshot::channel();
        let (second_done, second_rx) = oneshot::channel();
        tx.send((publish(1), first_rx)).unwrap();
        tx.send((publish(2), second_rx)).unwrap();
        drop(tx);

        let recorded = Arc::clone(&acked);
        let acker = tokio::spawn(ack_in_arrival_order(rx, move |publish| {
            recorded.lock().unwrap().push(publish.pkid);
            async {}
        }));

        // The later message finishes first but is not acked ahead of the earlier one
        second_done.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(acked.lock().unwrap().is_empty());

        first_done.send(()).unwrap();
        acker.await.unwrap();
        assert_eq!(*acked.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_abandoned_run_is_still_acked() {
        let (tx, rx) = mpsc::unbounded_channel();
        let acked = Arc::new(Mutex::new(Vec::new()));

        let (done, done_rx) = oneshot::channel::<()>();
        tx.send((publish(5), done_rx)).unwrap();
        drop(tx);
        drop(done);

        let recorded = Arc::clone(&acked);
        ack_in_arrival_order(rx, move |publish| {
            recorded.lock().unwrap().push(publish.pkid);
            async {}
        })
        .await;

        assert_eq!(*acked.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let (client, eventloop) = AsyncClient::new(
            MqttOptions::new("subscriber-test", "127.0.0.1", 1),
            10,
        );
        let subscriber = MqttSubscriber::new(
            client,
            eventloop,
            service(MockGeofenceEventRepository::new(), MockChangeNotifier::new()),
            PublishAcks::new(),
            MqttSubscriberConfig {
                subscribe_topic: "owntracks/+/+/event".to_string(),
                qos: QoS::ExactlyOnce,
                reconnect_delay: Duration::from_millis(10),
                drain_timeout: Duration::from_millis(100),
            },
        );

        let token = CancellationToken::new();
        let handle = tokio::spawn(subscriber.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("subscriber should stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }
}
