use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use hashbrown::HashSet;

use serde::Serialize;
use serde_json::Value;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use uuid::Uuid;

use wiotp::codec::Payload;
use wiotp::device::{DeviceInfo, DeviceProperty};
use wiotp::firmware::{FirmwareState, UpdateStatus};
use wiotp::identity::Identity;
use wiotp::message::{
    Envelope, ErrorCode, FieldChange, Location, LogEntry, LogSeverity, ManageRequest, Metadata,
};
use wiotp::response::ResponseCode;
use wiotp::topic::{OutboundTopic, event_topic, outbound_topic, subscriptions};

use crate::config::{ManageParams, ManagedConfig};
use crate::dispatcher::Handlers;
use crate::error::{Error, ErrorKind, Result};
use crate::firmware::FirmwareHandle;
use crate::pending::{Completion, Operation, Outcome, PendingTable};
use crate::responder::{self, Responder, ResponderTopics};
use crate::session::{Session, SessionState};
use crate::sync::lock;
use crate::transport::{QoS, Transport};

// Reaper ticks within the maximum age of a request.
const REAP_TICKS: u32 = 4;

const MIN_REAP_PERIOD: Duration = Duration::from_millis(1);

// Shared state of a managed client.
pub(crate) struct Inner<T: Transport> {
    pub(crate) identity: Identity,
    pub(crate) config: ManagedConfig,
    pub(crate) transport: Arc<T>,
    pub(crate) pending: PendingTable,
    pub(crate) session: Session,
    pub(crate) firmware: FirmwareHandle,
    pub(crate) responder: Responder,
    pub(crate) handlers: Handlers,
    pub(crate) device_info: Mutex<DeviceInfo>,
    pub(crate) metadata: Mutex<Metadata>,
    pub(crate) location: Mutex<Option<Location>>,
    pub(crate) observed: Mutex<HashSet<String>>,
    pub(crate) runtime: Handle,
    renewals: flume::Sender<ManageParams>,
    shutdown: CancellationToken,
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        self.session.cancel_renewal();
        self.shutdown.cancel();
    }
}

/// A managed client.
///
/// It runs the device-management protocol for a device, or for a device
/// attached to a gateway, on top of a [`Transport`]. Cloning a client is
/// cheap and every clone drives the same session.
pub struct ManagedClient<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ManagedClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for ManagedClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedClient")
            .field("identity", &self.inner.identity)
            .field("state", &self.inner.session.state())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ManagedClient<T> {
    /// Creates a [`ManagedClient`] without callbacks.
    ///
    /// It must be called within a `tokio` runtime.
    ///
    /// # Errors
    ///
    /// It fails when the configuration is not valid or when no `tokio`
    /// runtime is running.
    pub fn new(config: ManagedConfig, transport: T) -> Result<Self> {
        Self::with_handlers(config, transport, Handlers::new())
    }

    /// Creates a [`ManagedClient`] with the given [`Handlers`].
    ///
    /// It must be called within a `tokio` runtime.
    ///
    /// # Errors
    ///
    /// It fails when the configuration is not valid or when no `tokio`
    /// runtime is running.
    pub fn with_handlers(config: ManagedConfig, transport: T, handlers: Handlers) -> Result<Self> {
        config.validate()?;

        let runtime = Handle::try_current().map_err(|e| {
            Error::new(
                ErrorKind::Configuration,
                format!("A managed client requires a running tokio runtime: {e}"),
            )
        })?;

        let identity = config.identity().clone();
        let transport = Arc::new(transport);
        let (responder, outbound) = Responder::channel();
        let (renewals, renewal_requests) = flume::unbounded();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            pending: PendingTable::new(),
            session: Session::new(config.readiness_wait()),
            firmware: FirmwareHandle::new(responder.clone()),
            device_info: Mutex::new(config.initial_device_info().clone()),
            metadata: Mutex::new(config.initial_metadata().clone()),
            location: Mutex::new(None),
            observed: Mutex::new(HashSet::new()),
            transport: Arc::clone(&transport),
            responder,
            handlers,
            runtime,
            renewals,
            shutdown: shutdown.clone(),
            identity,
            config,
        });

        let topics = ResponderTopics {
            response: outbound_topic(OutboundTopic::Response, &inner.identity),
            notify: outbound_topic(OutboundTopic::Notify, &inner.identity),
        };
        inner.runtime.spawn(responder::serve(
            transport,
            outbound,
            topics,
            shutdown.clone(),
        ));
        inner.runtime.spawn(drive_renewals(
            Arc::downgrade(&inner),
            renewal_requests,
            shutdown.clone(),
        ));
        inner.runtime.spawn(reap_expired(
            Arc::downgrade(&inner),
            inner.config.request_max_age(),
            shutdown,
        ));

        info!("Managed client created for {}", inner.identity.client_id());

        Ok(Self { inner })
    }

    /// Returns the client [`Identity`].
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Returns the underlying [`Transport`].
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Subscribes to the device-management topics and to the command topic.
    ///
    /// # Errors
    ///
    /// It fails when a subscription cannot be sent.
    pub async fn subscribe(&self) -> Result<()> {
        for topic in subscriptions(&self.inner.identity) {
            debug!("Subscribing to `{topic}`");
            self.inner.transport.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Notifies the client that its subscriptions have been acknowledged.
    ///
    /// The client registers for device management with the configured
    /// [`ManageParams`].
    pub fn subscriptions_acknowledged(&self) {
        info!("Device management subscriptions acknowledged");
        self.inner.session.set_subscribed(true);
        self.post_renewal(self.inner.config.default_manage_params().clone());
    }

    /// Notifies the client that the connection has been lost.
    ///
    /// Subscriptions are considered lost until they are acknowledged again.
    pub fn connection_lost(&self) {
        warn!("Connection lost, device management subscriptions are not in place");
        self.inner.session.set_subscribed(false);
    }

    /// Handles a message received on a subscribed topic.
    ///
    /// It never blocks: user callbacks and responses run on other tasks.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) {
        self.inner.dispatch(topic, payload);
    }

    /// Registers the client for device management.
    ///
    /// Lease lifetimes shorter than an hour are infinite. Otherwise the
    /// registration is renewed two minutes before the lease expires,
    /// replacing any renewal scheduled before.
    ///
    /// If the subscriptions are not acknowledged within the readiness
    /// timeout, nothing is sent and the [`Completion`] resolves to
    /// [`Outcome::NotSent`].
    ///
    /// # Errors
    ///
    /// It fails when the request cannot be serialized or published.
    pub async fn manage(&self, params: ManageParams) -> Result<Completion> {
        if self.inner.shutdown.is_cancelled() || !self.inner.session.wait_subscribed().await {
            warn!(
                "Unable to send register for device management because device subscriptions are not in place"
            );
            return Ok(Completion::not_sent());
        }

        let request = ManageRequest {
            lifetime: params.lifetime(),
            supports: params.supports().clone(),
            device_info: lock(&self.inner.device_info).clone(),
            metadata: lock(&self.inner.metadata).clone(),
        };

        let generation = self.inner.session.begin_manage();
        let completion = self
            .send_request(Operation::Manage { generation }, Some(request))
            .await?;

        match params.renewal_period() {
            Some(period) => {
                let renewals = self.inner.renewals.clone();
                self.inner.session.schedule_renewal(period, move || {
                    if renewals.send(params).is_err() {
                        debug!("Client dropped, lease renewal skipped");
                    }
                });
            }
            None => self.inner.session.cancel_renewal(),
        }

        Ok(completion)
    }

    /// Deregisters the client from device management.
    ///
    /// It requires the session to be [`SessionState::Managed`]. The lease
    /// renewal stops once the platform accepts the deregistration.
    ///
    /// # Errors
    ///
    /// It fails when the request cannot be serialized or published.
    pub async fn unmanage(&self) -> Result<Completion> {
        if !self.ready_for_management("set device to unmanaged").await {
            return Ok(Completion::not_sent());
        }

        let generation = self.inner.session.begin_unmanage();
        self.send_request::<()>(Operation::Unmanage { generation }, None)
            .await
    }

    /// Publishes the device location.
    ///
    /// The measurement time is the current time. The location is kept even
    /// when it cannot be published.
    ///
    /// # Errors
    ///
    /// It fails when the request cannot be serialized or published.
    pub async fn set_location(
        &self,
        longitude: f64,
        latitude: f64,
        elevation: Option<f64>,
        accuracy: Option<f64>,
    ) -> Result<Completion> {
        let location = Location {
            longitude,
            latitude,
            elevation,
            accuracy,
            measured_date_time: chrono::Utc::now().to_rfc3339(),
        };
        *lock(&self.inner.location) = Some(location.clone());

        if !self.ready_for_management("publish device location").await {
            return Ok(Completion::not_sent());
        }
        self.send_request(Operation::UpdateLocation, Some(location))
            .await
    }

    /// Publishes a diagnostic error code.
    ///
    /// # Errors
    ///
    /// It fails when the request cannot be serialized or published.
    pub async fn set_error_code(&self, error_code: i64) -> Result<Completion> {
        if !self.ready_for_management("publish error code").await {
            return Ok(Completion::not_sent());
        }
        self.send_request(Operation::AddErrorCode, Some(ErrorCode { error_code }))
            .await
    }

    /// Clears all diagnostic error codes.
    ///
    /// # Errors
    ///
    /// It fails when the request cannot be serialized or published.
    pub async fn clear_error_codes(&self) -> Result<Completion> {
        if !self.ready_for_management("clear error codes").await {
            return Ok(Completion::not_sent());
        }
        self.send_request::<()>(Operation::ClearErrorCodes, None)
            .await
    }

    /// Adds a diagnostic log entry stamped with the current time.
    ///
    /// # Errors
    ///
    /// It fails when the request cannot be serialized or published.
    pub async fn add_log(
        &self,
        message: impl Into<String>,
        data: impl Into<String>,
        severity: LogSeverity,
    ) -> Result<Completion> {
        if !self.ready_for_management("publish log entry").await {
            return Ok(Completion::not_sent());
        }
        let entry = LogEntry {
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            data: data.into(),
            severity,
        };
        self.send_request(Operation::AddLog, Some(entry)).await
    }

    /// Clears all diagnostic log entries.
    ///
    /// # Errors
    ///
    /// It fails when the request cannot be serialized or published.
    pub async fn clear_log(&self) -> Result<Completion> {
        if !self.ready_for_management("clear log").await {
            return Ok(Completion::not_sent());
        }
        self.send_request::<()>(Operation::ClearLog, None).await
    }

    /// Notifies the platform that an observed attribute changed.
    ///
    /// Nothing is sent when the platform does not observe the attribute.
    ///
    /// # Errors
    ///
    /// It fails when the request cannot be serialized or published.
    pub async fn notify_field_change(
        &self,
        field: impl Into<String>,
        value: Value,
    ) -> Result<Completion> {
        let field = field.into();
        if !self.is_observed(&field) {
            debug!("Field `{field}` is not observed, change not notified");
            return Ok(Completion::not_sent());
        }
        if !self
            .ready_for_management("notify service of field change")
            .await
        {
            return Ok(Completion::not_sent());
        }
        self.send_request(Operation::Notify, Some(FieldChange { field, value }))
            .await
    }

    /// Changes a device information property and notifies the platform if
    /// it observes the property.
    ///
    /// # Errors
    ///
    /// It fails when the request cannot be serialized or published.
    pub async fn set_property(
        &self,
        property: DeviceProperty,
        value: impl Into<String>,
    ) -> Result<Completion> {
        let value = value.into();
        lock(&self.inner.device_info).set(property, value.as_str());
        self.notify_field_change(property.field(), Value::String(value))
            .await
    }

    /// Responds to a server-initiated request.
    ///
    /// The response is published on a background task.
    pub fn respond_device_action(
        &self,
        req_id: impl Into<String>,
        rc: ResponseCode,
        message: impl Into<String>,
    ) {
        self.inner.responder.respond(req_id, rc, message);
    }

    /// Returns a [`Responder`] for answering server-initiated requests.
    #[must_use]
    pub fn responder(&self) -> Responder {
        self.inner.responder.clone()
    }

    /// Returns the [`FirmwareHandle`].
    #[must_use]
    pub fn firmware(&self) -> FirmwareHandle {
        self.inner.firmware.clone()
    }

    /// Changes the firmware state and notifies the platform.
    pub fn set_firmware_state(&self, state: FirmwareState) {
        self.inner.firmware.set_state(state);
    }

    /// Records the outcome of the last firmware update and notifies the
    /// platform.
    pub fn set_update_status(&self, update_status: UpdateStatus) {
        self.inner.firmware.set_update_status(update_status);
    }

    /// Publishes an event encoded with the codec of the given format.
    ///
    /// # Errors
    ///
    /// It fails when no codec can encode the payload or when the event
    /// cannot be published.
    pub async fn publish_event(
        &self,
        event: &str,
        format: &str,
        payload: &Payload,
        qos: QoS,
    ) -> Result<()> {
        let bytes = self.inner.handlers.codec_registry().encode(format, payload)?;
        let topic = event_topic(&self.inner.identity, event, format);
        debug!("Publishing event on `{topic}`");
        self.inner.transport.publish(topic, bytes, qos).await
    }

    /// Returns the [`SessionState`].
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    /// Returns a receiver notified at every [`SessionState`] change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.session.watch()
    }

    /// Returns the [`DeviceInfo`].
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        lock(&self.inner.device_info).clone()
    }

    /// Returns the device metadata.
    ///
    /// The platform replaces the metadata whenever the device record
    /// changes.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        lock(&self.inner.metadata).clone()
    }

    /// Returns the last [`Location`] set on the device.
    #[must_use]
    pub fn location(&self) -> Option<Location> {
        lock(&self.inner.location).clone()
    }

    /// Checks whether the platform observes an attribute.
    #[must_use]
    pub fn is_observed(&self, field: &str) -> bool {
        lock(&self.inner.observed).contains(field)
    }

    /// Returns the number of requests waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Shuts the client down.
    ///
    /// The lease renewal is cancelled, background tasks are stopped and
    /// every pending request completes with [`Outcome::Cancelled`].
    pub fn shutdown(&self) {
        info!("Shutting down managed client {}", self.inner.identity.client_id());
        self.inner.session.cancel_renewal();
        self.inner.session.set_subscribed(false);
        self.inner.shutdown.cancel();
        for request in self.inner.pending.drain() {
            self.inner.session.abort(request.operation);
            request.complete(Outcome::Cancelled);
        }
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    fn post_renewal(&self, params: ManageParams) {
        if self.inner.renewals.send(params).is_err() {
            warn!("Session driver stopped, registration skipped");
        }
    }

    async fn ready_for_management(&self, action: &str) -> bool {
        if !self.inner.shutdown.is_cancelled() && self.inner.session.wait_managed().await {
            return true;
        }
        warn!("Unable to {action} because device is not ready for device management");
        false
    }

    async fn send_request<D: Serialize>(
        &self,
        operation: Operation,
        data: Option<D>,
    ) -> Result<Completion> {
        let id = Uuid::new_v4();
        let topic = outbound_topic(operation.topic(), &self.inner.identity);

        let payload = match serde_json::to_string(&Envelope {
            d: data,
            req_id: id.to_string(),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                self.inner.session.abort(operation);
                return Err(e.into());
            }
        };

        let completion =
            self.inner
                .pending
                .register(id, operation, topic.clone(), payload.clone());

        if let Err(e) = self
            .inner
            .transport
            .publish(topic, payload.into_bytes(), QoS::AtLeastOnce)
            .await
        {
            self.inner.pending.remove(&id);
            self.inner.session.abort(operation);
            return Err(e);
        }

        Ok(completion)
    }
}

// Runs the registrations posted by the lease renewal timer and by the
// subscription acknowledgements.
async fn drive_renewals<T: Transport>(
    client: Weak<Inner<T>>,
    renewals: flume::Receiver<ManageParams>,
    shutdown: CancellationToken,
) {
    loop {
        let params = tokio::select! {
            () = shutdown.cancelled() => break,
            params = renewals.recv_async() => match params {
                Ok(params) => params,
                Err(_) => break,
            },
        };
        let Some(inner) = client.upgrade() else {
            break;
        };
        let client = ManagedClient { inner };
        if let Err(e) = client.manage(params).await {
            warn!("Automatic registration failed: {e}");
        }
    }
    debug!("Session driver stopped");
}

// Expires the requests that never received a response.
//
// A request is removed at most a quarter of its maximum age after it
// expired.
async fn reap_expired<T: Transport>(
    client: Weak<Inner<T>>,
    max_age: Duration,
    shutdown: CancellationToken,
) {
    let mut ticks = interval((max_age / REAP_TICKS).max(MIN_REAP_PERIOD));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticks.tick() => {}
        }
        let Some(inner) = client.upgrade() else {
            break;
        };
        for request in inner.pending.reap(max_age) {
            inner.session.abort(request.operation);
            request.complete(Outcome::Expired);
        }
    }
    debug!("Request reaper stopped");
}
