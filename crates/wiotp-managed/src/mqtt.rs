use std::time::Duration;

use rumqttc::v5::mqttbytes::v5::{Packet, SubAck, SubscribeReasonCode};
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};

use tracing::{debug, error, info, warn};

use crate::client::ManagedClient;
use crate::config::ManagedConfig;
use crate::error::Result;
use crate::transport::{QoS, Transport};

// Capacity of the request queue between the client and the event loop.
const REQUEST_QUEUE_CAPACITY: usize = 64;

// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// An MQTT 5 [`Transport`] connected to the Watson IoT Platform.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    /// Creates an [`MqttTransport`] and the [`MqttEventLoop`] driving it.
    ///
    /// No connection is attempted until the event loop runs.
    #[must_use]
    pub fn connect(config: &ManagedConfig) -> (Self, MqttEventLoop) {
        let client_id = config.identity().client_id();
        let host = config.host();

        let mut options = MqttOptions::new(client_id.as_str(), host.as_str(), config.broker_port());
        options.set_keep_alive(config.keep_alive_interval());
        options.set_clean_start(config.is_clean_start());
        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password.to_owned());
        }

        info!(
            "Connecting {client_id} to {host}:{}",
            config.broker_port()
        );

        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        (
            Self { client },
            MqttEventLoop {
                eventloop,
                subscriptions: Subscriptions::new(
                    wiotp::topic::subscriptions(config.identity()).len(),
                ),
            },
        )
    }

    /// Disconnects from the broker.
    ///
    /// # Errors
    ///
    /// It fails when the disconnection request cannot be queued.
    pub async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}

impl Transport for MqttTransport {
    async fn publish(&self, topic: String, payload: Vec<u8>, qos: QoS) -> Result<()> {
        self.client.publish(topic, qos, false, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: String, qos: QoS) -> Result<()> {
        self.client.subscribe(topic, qos).await?;
        Ok(())
    }
}

// Counts the subscriptions granted by the broker on the current connection.
#[derive(Debug)]
struct Subscriptions {
    expected: usize,
    granted: usize,
}

impl Subscriptions {
    const fn new(expected: usize) -> Self {
        Self {
            expected,
            granted: 0,
        }
    }

    fn reset(&mut self) {
        self.granted = 0;
    }

    // Records an acknowledgement and returns whether it completes the
    // subscriptions.
    //
    // An acknowledgement refusing any of its filters is not counted.
    fn acknowledge(&mut self, suback: &SubAck) -> bool {
        let refused: Vec<_> = suback
            .return_codes
            .iter()
            .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
            .collect();
        if !refused.is_empty() {
            warn!(
                "Subscription {} refused by the broker: {refused:?}",
                suback.pkid
            );
            return false;
        }

        self.granted += 1;
        self.granted == self.expected
    }
}

/// The MQTT event loop of a managed client.
pub struct MqttEventLoop {
    eventloop: EventLoop,
    subscriptions: Subscriptions,
}

impl std::fmt::Debug for MqttEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttEventLoop")
            .field("subscriptions", &self.subscriptions.expected)
            .finish_non_exhaustive()
    }
}

impl MqttEventLoop {
    /// Runs the event loop until the client shuts down.
    ///
    /// Subscriptions are sent at every connection and, once all of them are
    /// acknowledged, the client registers for device management.
    pub async fn run(mut self, client: ManagedClient<MqttTransport>) {
        let shutdown = client.shutdown_token();
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to the Watson IoT Platform");
                    self.subscriptions.reset();
                    let client = client.clone();
                    tokio::spawn(async move {
                        if let Err(e) = client.subscribe().await {
                            error!("Unable to subscribe to device management topics: {e}");
                        }
                    });
                }
                Ok(Event::Incoming(Packet::SubAck(suback))) => {
                    if self.subscriptions.acknowledge(&suback) {
                        client.subscriptions_acknowledged();
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match std::str::from_utf8(&publish.topic) {
                        Ok(topic) => client.handle_message(topic, &publish.payload),
                        Err(e) => warn!("Dropping message with invalid topic: {e}"),
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect(_))) => {
                    warn!("Disconnected by the broker");
                    client.connection_lost();
                }
                Ok(event) => debug!("MQTT event: {event:?}"),
                Err(e) => {
                    warn!("MQTT connection error: {e}");
                    client.connection_lost();
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }

        if let Err(e) = client.transport().disconnect().await {
            debug!("Disconnection not sent: {e}");
        }
        info!("MQTT event loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::v5::mqttbytes::QoS;
    use rumqttc::v5::mqttbytes::v5::{SubAck, SubscribeReasonCode};

    use super::Subscriptions;

    fn suback(pkid: u16, return_codes: Vec<SubscribeReasonCode>) -> SubAck {
        SubAck {
            pkid,
            return_codes,
            properties: None,
        }
    }

    fn granted(pkid: u16) -> SubAck {
        suback(pkid, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)])
    }

    #[test]
    fn all_granted() {
        let mut subscriptions = Subscriptions::new(3);

        assert!(!subscriptions.acknowledge(&granted(1)));
        assert!(!subscriptions.acknowledge(&granted(2)));
        assert!(subscriptions.acknowledge(&granted(3)));
    }

    #[test]
    fn refused() {
        let mut subscriptions = Subscriptions::new(2);

        assert!(!subscriptions.acknowledge(&granted(1)));
        assert!(!subscriptions.acknowledge(&suback(
            2,
            vec![SubscribeReasonCode::NotAuthorized]
        )));
        assert!(!subscriptions.acknowledge(&suback(
            3,
            vec![
                SubscribeReasonCode::Success(QoS::AtMostOnce),
                SubscribeReasonCode::TopicFilterInvalid,
            ]
        )));
    }

    #[test]
    fn reconnection() {
        let mut subscriptions = Subscriptions::new(2);

        assert!(!subscriptions.acknowledge(&granted(1)));
        subscriptions.reset();

        assert!(!subscriptions.acknowledge(&granted(2)));
        assert!(subscriptions.acknowledge(&granted(3)));
    }
}
