use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use wiotp::firmware::FirmwareStatus;
use wiotp::message::{ActionResponse, Notification};
use wiotp::response::ResponseCode;

use crate::error::Result;
use crate::transport::{QoS, Transport};

// A message published off the inbound delivery path.
#[derive(Debug)]
pub(crate) enum Outbound {
    Response(ActionResponse),
    Firmware(FirmwareStatus),
}

impl Outbound {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Self::Response(response) => serde_json::to_vec(response)?,
            Self::Firmware(status) => serde_json::to_vec(&Notification::firmware(*status))?,
        })
    }
}

/// A handle that publishes responses to server-initiated requests.
///
/// Responses are queued and published by a dedicated task, so responding
/// never blocks.
#[derive(Debug, Clone)]
pub struct Responder(flume::Sender<Outbound>);

impl Responder {
    pub(crate) fn channel() -> (Self, flume::Receiver<Outbound>) {
        let (sender, receiver) = flume::unbounded();
        (Self(sender), receiver)
    }

    /// Responds to a server-initiated request.
    pub fn respond(&self, req_id: impl Into<String>, rc: ResponseCode, message: impl Into<String>) {
        let response = ActionResponse::new(req_id, rc, message);
        info!(
            "Publishing device action response [{}] for request {}",
            response.rc, response.req_id
        );
        self.enqueue(Outbound::Response(response));
    }

    pub(crate) fn notify_firmware(&self, status: FirmwareStatus) {
        info!("Publishing firmware state update: {status:?}");
        self.enqueue(Outbound::Firmware(status));
    }

    fn enqueue(&self, outbound: Outbound) {
        if self.0.send(outbound).is_err() {
            warn!("Responder stopped, outbound message dropped");
        }
    }
}

// Topics the responder publishes on.
#[derive(Debug, Clone)]
pub(crate) struct ResponderTopics {
    pub(crate) response: String,
    pub(crate) notify: String,
}

// Publishes queued messages in order until shutdown or until every
// responder handle is dropped.
pub(crate) async fn serve<T: Transport>(
    transport: Arc<T>,
    receiver: flume::Receiver<Outbound>,
    topics: ResponderTopics,
    shutdown: CancellationToken,
) {
    loop {
        let outbound = tokio::select! {
            () = shutdown.cancelled() => break,
            outbound = receiver.recv_async() => match outbound {
                Ok(outbound) => outbound,
                Err(_) => break,
            },
        };

        let topic = match outbound {
            Outbound::Response(_) => &topics.response,
            Outbound::Firmware(_) => &topics.notify,
        };

        let Ok(payload) = outbound.encode() else {
            continue;
        };

        if let Err(e) = transport
            .publish(topic.clone(), payload, QoS::AtLeastOnce)
            .await
        {
            warn!("Unable to publish on `{topic}`: {e}");
        }
    }
    debug!("Responder stopped");
}
