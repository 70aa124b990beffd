use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Pause after an event-loop error before polling (and reconnecting) again.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Capacity of the client's outgoing request queue.
const REQUEST_QUEUE_CAP: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("mqtt client rejected publish: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("publisher is shut down")]
    Closed,
}

/// Sink for outbound device commands.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Hand `payload` to the transport for `topic`. Does not wait for delivery.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    cancel: CancellationToken,
}

impl MqttPublisher {
    /// Create the client and spawn the task that drives its event loop.
    /// The task ends when `cancel` fires.
    pub fn connect(config: &Config, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(&config.mqtt_client_id, &config.mqtt_host, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAP);
        info!(host = %config.mqtt_host, port = config.mqtt_port, "MQTT client configured");

        let loop_cancel = cancel.clone();
        let loop_client = client.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => info!("MQTT connected"),
                        Ok(Event::Incoming(Packet::Disconnect)) => warn!("MQTT disconnected"),
                        Ok(event) => debug!(?event, "MQTT event"),
                        Err(e) => {
                            warn!(error = %e, "MQTT connection error");
                            tokio::select! {
                                _ = loop_cancel.cancelled() => break,
                                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            }
                        }
                    },
                }
            }

            let _ = loop_client.try_disconnect();
            info!("MQTT event loop stopped");
        });

        (Self { client, cancel }, handle)
    }
}

#[async_trait]
impl CommandPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if self.cancel.is_cancelled() {
            return Err(PublishError::Closed);
        }
        self.client.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::StoreBackend;

    fn config() -> Config {
        Config {
            store: StoreBackend::Memory,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            sources: Vec::new(),
            device_key: "default".into(),
            retry_delay: Duration::from_secs(1),
            mqtt_host: "127.0.0.1".into(),
            mqtt_port: 1,
            mqtt_client_id: "test-client".into(),
            topic_namespace: "hydro".into(),
        }
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_rejected() {
        let cancel = CancellationToken::new();
        let (publisher, handle) = MqttPublisher::connect(&config(), cancel.clone());

        cancel.cancel();
        handle.await.unwrap();

        let err = publisher.publish("hydro/dev1/commands", b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, PublishError::Closed));
    }

    #[tokio::test]
    async fn shutdown_does_not_wait_out_reconnect_delay() {
        let cancel = CancellationToken::new();
        let (_publisher, handle) = MqttPublisher::connect(&config(), cancel.clone());

        // Nothing listens on port 1, so the loop is backing off by now.
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("event loop should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn publish_is_queued_without_a_broker() {
        let cancel = CancellationToken::new();
        let (publisher, handle) = MqttPublisher::connect(&config(), cancel.clone());

        publisher
            .publish("hydro/dev1/commands", b"{\"cmd\":\"filter\"}".to_vec())
            .await
            .unwrap();

        cancel.cancel();
        handle.await.unwrap();
    }
}
