use crate::domain::TransitionIngestionService;
use crate::mqtt::{
    create_mqtt_client, parse_qos, MqttChangeNotifier, MqttConnectionConfig, MqttSubscriber,
    MqttSubscriberConfig, PublishAcks,
};
use common::domain::GeofenceEventRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use trackbox_runner::AppProcess;

pub struct TransitionIngesterConfig {
    pub mqtt: MqttConnectionConfig,
    pub subscribe_topic: String,
    pub subscribe_qos: u8,
    pub reconnect_delay_secs: u64,
    pub notification_topic_prefix: String,
    pub notification_timeout_ms: u64,
    pub shutdown_drain_timeout_secs: u64,
}

pub struct TransitionIngester {
    subscriber: MqttSubscriber,
}

impl TransitionIngester {
    pub fn new(
        event_repository: Arc<dyn GeofenceEventRepository>,
        config: TransitionIngesterConfig,
    ) -> anyhow::Result<Self> {
        info!("Initializing transition ingester module");

        let qos = parse_qos(config.subscribe_qos)?;
        let (client, eventloop) = create_mqtt_client(&config.mqtt)?;

        // Notifications share the subscriber's connection, whose event loop
        // reports their PUBACKs
        let acks = PublishAcks::new();
        let notifier = Arc::new(MqttChangeNotifier::new(
            client.clone(),
            acks.clone(),
            config.notification_topic_prefix,
            Duration::from_millis(config.notification_timeout_ms),
        ));
        let service = Arc::new(TransitionIngestionService::new(event_repository, notifier));

        let subscriber = MqttSubscriber::new(
            client,
            eventloop,
            service,
            acks,
            MqttSubscriberConfig {
                subscribe_topic: config.subscribe_topic,
                qos,
                reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
                drain_timeout: Duration::from_secs(config.shutdown_drain_timeout_secs),
            },
        );

        info!(broker_url = %config.mqtt.broker_url, "Transition ingester initialized");

        Ok(Self { subscriber })
    }

    pub fn into_runner_process(self) -> AppProcess {
        let subscriber = self.subscriber;
        Box::new(move |ctx| Box::pin(async move { subscriber.run(ctx).await }))
    }
}
