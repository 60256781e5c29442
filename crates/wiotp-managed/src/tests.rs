use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use tokio::time::timeout;

use wiotp::identity::Identity;

use crate::client::ManagedClient;
use crate::config::ManagedConfig;
use crate::dispatcher::Handlers;
use crate::error::{Error, ErrorKind, Result};
use crate::session::SessionState;
use crate::transport::{QoS, Transport};

// Maximum wait for a published message.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const RESPONSE_TOPIC: &str = "iotdm-1/response";

#[derive(Debug)]
pub(crate) struct Published {
    pub(crate) topic: String,
    pub(crate) payload: Vec<u8>,
    pub(crate) qos: QoS,
}

impl Published {
    pub(crate) fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap()
    }

    pub(crate) fn req_id(&self) -> String {
        self.json()["reqId"].as_str().unwrap().to_owned()
    }
}

// Records every message instead of sending it.
#[derive(Debug)]
pub(crate) struct RecordingTransport {
    published: flume::Sender<Published>,
    subscriptions: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub(crate) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Transport for RecordingTransport {
    async fn publish(&self, topic: String, payload: Vec<u8>, qos: QoS) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Transport, "Connection refused"));
        }
        let _ = self.published.send(Published {
            topic,
            payload,
            qos,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: String, _qos: QoS) -> Result<()> {
        self.subscriptions.lock().unwrap().push(topic);
        Ok(())
    }
}

pub(crate) fn recording_transport() -> (RecordingTransport, flume::Receiver<Published>) {
    let (published, receiver) = flume::unbounded();
    (
        RecordingTransport {
            published,
            subscriptions: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        },
        receiver,
    )
}

pub(crate) async fn next_published(published: &flume::Receiver<Published>) -> Published {
    timeout(PUBLISH_TIMEOUT, published.recv_async())
        .await
        .expect("No message published")
        .unwrap()
}

pub(crate) fn device_config() -> ManagedConfig {
    ManagedConfig::new(Identity::device("myorg", "sensor", "dev-1")).auth_token("secret")
}

pub(crate) fn managed_client(
    handlers: Handlers,
) -> (
    ManagedClient<RecordingTransport>,
    flume::Receiver<Published>,
) {
    let (transport, published) = recording_transport();
    let client = ManagedClient::with_handlers(device_config(), transport, handlers).unwrap();
    (client, published)
}

// Sends a response from the platform.
pub(crate) fn respond(client: &ManagedClient<RecordingTransport>, req_id: &str, rc: u16) {
    client.handle_message(
        RESPONSE_TOPIC,
        json!({ "rc": rc, "reqId": req_id }).to_string().as_bytes(),
    );
}

// Registers the client with an infinite lease.
pub(crate) async fn managed(
    handlers: Handlers,
) -> (
    ManagedClient<RecordingTransport>,
    flume::Receiver<Published>,
) {
    let (client, published) = managed_client(handlers);
    client.subscriptions_acknowledged();

    let request = next_published(&published).await;
    assert_eq!(request.topic, "iotdevice-1/mgmt/manage");
    respond(&client, &request.req_id(), 200);

    let mut state = client.watch_state();
    state
        .wait_for(|state| *state == SessionState::Managed)
        .await
        .unwrap();

    (client, published)
}
