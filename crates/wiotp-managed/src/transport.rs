use std::future::Future;

pub use rumqttc::v5::mqttbytes::QoS;

use crate::error::Result;

/// A publish/subscribe transport.
///
/// Publishing is expected to enqueue a message and return without waiting
/// for the broker.
pub trait Transport: Send + Sync + 'static {
    /// Publishes a payload on a topic.
    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Subscribes to a topic filter.
    fn subscribe(&self, topic: String, qos: QoS) -> impl Future<Output = Result<()>> + Send;
}
