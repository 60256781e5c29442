use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;

use tracing::{debug, error, info, warn};

use uuid::Uuid;

use wiotp::codec::{CodecRegistry, Payload};
use wiotp::firmware::{DeviceFirmware, FIRMWARE_FIELD, FirmwareAction};
use wiotp::message::{ActionRequest, DeviceUpdate, FieldsRequest, ManagementResponse};
use wiotp::response::{
    ACCEPTED, BAD_REQUEST, CHANGED, INTERNAL_ERROR, NOT_IMPLEMENTED, OK, ResponseCode,
};
use wiotp::topic::{Inbound, classify};

use crate::client::Inner;
use crate::firmware::FirmwareRequest;
use crate::responder::Responder;
use crate::sync::lock;
use crate::transport::Transport;

// Dotted path of the metadata object in the device record.
const METADATA_FIELD: &str = "metadata";

const DME_SUCCESS: &str = "DME Action successfully completed from Callback";
const UNEXPECTED_ERROR: &str = "Unexpected device error";
const NOT_IMPLEMENTED_MESSAGE: &str = "Operation not implemented";

/// A device action requested by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAction {
    /// Reboot the device.
    Reboot,
    /// Reset the device to its factory settings.
    FactoryReset,
}

impl std::fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reboot => "reboot",
            Self::FactoryReset => "reset",
        }
        .fmt(f)
    }
}

/// A device action request.
///
/// The receiver of the request owns its response, which must be sent with
/// [`DeviceActionRequest::respond`].
#[derive(Debug)]
pub struct DeviceActionRequest {
    req_id: String,
    action: DeviceAction,
    responder: Responder,
    responded: Arc<AtomicBool>,
}

impl DeviceActionRequest {
    /// Returns the correlation identifier of the request.
    #[must_use]
    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    /// Returns the requested [`DeviceAction`].
    #[must_use]
    pub const fn action(&self) -> DeviceAction {
        self.action
    }

    /// Responds to the request.
    pub fn respond(self, rc: ResponseCode, message: impl Into<String>) {
        self.responded.store(true, Ordering::SeqCst);
        self.responder.respond(self.req_id, rc, message);
    }
}

/// A management-extension action request.
#[derive(Debug, Clone, PartialEq)]
pub struct DmeRequest {
    action: String,
    req_id: String,
    data: Option<Value>,
}

impl DmeRequest {
    /// Returns the action path, i.e. `bundle/action`.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns the correlation identifier of the request.
    #[must_use]
    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    /// Returns the action data.
    #[must_use]
    pub const fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

/// A device command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Command name.
    pub command: String,
    /// Payload format.
    pub format: String,
    /// Decoded payload.
    pub payload: Payload,
}

type DeviceActionCallback = Arc<dyn Fn(DeviceActionRequest) + Send + Sync>;
type FirmwareCallback = Arc<dyn Fn(FirmwareRequest) + Send + Sync>;
type DmeCallback = Arc<dyn Fn(&DmeRequest) -> bool + Send + Sync>;
type CommandCallback = Arc<dyn Fn(Command) + Send + Sync>;

/// User callbacks and codecs of a managed client.
///
/// Callbacks run on a blocking thread, so they can perform long or
/// blocking work without delaying the delivery of other messages.
#[derive(Default)]
pub struct Handlers {
    device_action: Option<DeviceActionCallback>,
    firmware: Option<FirmwareCallback>,
    dme: Option<DmeCallback>,
    command: Option<CommandCallback>,
    codecs: CodecRegistry,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("device_action", &self.device_action.is_some())
            .field("firmware", &self.firmware.is_some())
            .field("dme", &self.dme.is_some())
            .field("command", &self.command.is_some())
            .field("codecs", &self.codecs)
            .finish()
    }
}

impl Handlers {
    /// Creates [`Handlers`] without callbacks and with the default codecs.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the callback for reboot and factory reset requests.
    ///
    /// Without this callback, those requests are answered with `501`.
    #[must_use]
    pub fn on_device_action(
        mut self,
        callback: impl Fn(DeviceActionRequest) + Send + Sync + 'static,
    ) -> Self {
        self.device_action = Some(Arc::new(callback));
        self
    }

    /// Sets the callback for accepted firmware download and update
    /// requests.
    #[must_use]
    pub fn on_firmware_action(
        mut self,
        callback: impl Fn(FirmwareRequest) + Send + Sync + 'static,
    ) -> Self {
        self.firmware = Some(Arc::new(callback));
        self
    }

    /// Sets the callback for management-extension actions.
    ///
    /// The returned value tells whether the action succeeded. Without this
    /// callback, actions are answered with `501`.
    #[must_use]
    pub fn on_dme_action(
        mut self,
        callback: impl Fn(&DmeRequest) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.dme = Some(Arc::new(callback));
        self
    }

    /// Sets the callback for device commands.
    #[must_use]
    pub fn on_command(mut self, callback: impl Fn(Command) + Send + Sync + 'static) -> Self {
        self.command = Some(Arc::new(callback));
        self
    }

    /// Sets the [`CodecRegistry`] used for events and commands.
    #[must_use]
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    pub(crate) const fn codec_registry(&self) -> &CodecRegistry {
        &self.codecs
    }
}

fn parse<T: DeserializeOwned>(topic: &str, payload: &[u8]) -> Option<T> {
    match serde_json::from_slice(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(
                "Unable to parse message on `{topic}`: payload=\"{}\" error={e}",
                String::from_utf8_lossy(payload)
            );
            None
        }
    }
}

impl<T: Transport> Inner<T> {
    pub(crate) fn dispatch(&self, topic: &str, payload: &[u8]) {
        let Some(inbound) = classify(&self.identity, topic) else {
            debug!("Ignoring message on unknown topic `{topic}`");
            return;
        };
        debug!(
            "Message received on topic `{topic}` with payload {}",
            String::from_utf8_lossy(payload)
        );

        match inbound {
            Inbound::Response => self.on_response(topic, payload),
            Inbound::Observe => self.on_observe(topic, payload, true),
            Inbound::CancelObserve => self.on_observe(topic, payload, false),
            Inbound::Reboot => self.on_device_action(topic, payload, DeviceAction::Reboot),
            Inbound::FactoryReset => {
                self.on_device_action(topic, payload, DeviceAction::FactoryReset);
            }
            Inbound::DeviceUpdate => self.on_device_update(topic, payload),
            Inbound::FirmwareDownload => {
                self.on_firmware_action(topic, payload, FirmwareAction::Download);
            }
            Inbound::FirmwareUpdate => {
                self.on_firmware_action(topic, payload, FirmwareAction::Update);
            }
            Inbound::Custom { action } => self.on_dme_action(topic, payload, action),
            Inbound::Command { command, format } => self.on_command(payload, command, format),
        }
    }

    fn on_response(&self, topic: &str, payload: &[u8]) {
        let Some(response) = parse::<ManagementResponse>(topic, payload) else {
            return;
        };
        // Not a correlated response.
        let Some(rc) = response.rc else {
            return;
        };
        let Some(req_id) = response.req_id else {
            warn!("Received response [{rc}] without request identifier");
            return;
        };
        let Ok(id) = Uuid::parse_str(&req_id) else {
            warn!("Received unexpected response from device management: {req_id}");
            return;
        };

        self.pending
            .resolve(&id, rc, |operation| self.session.on_response(operation, rc));
    }

    fn on_observe(&self, topic: &str, payload: &[u8], observe: bool) {
        let Some(request) = parse::<FieldsRequest>(topic, payload) else {
            return;
        };
        {
            let mut observed = lock(&self.observed);
            for field in request.d.names() {
                if observe {
                    info!("Observing field `{field}`");
                    observed.insert(field.to_owned());
                } else {
                    info!("Cancelling observation of field `{field}`");
                    observed.remove(field);
                }
            }
        }
        self.responder.respond(request.req_id, OK, "");
    }

    fn on_device_update(&self, topic: &str, payload: &[u8]) {
        let Some(update) = parse::<DeviceUpdate>(topic, payload) else {
            return;
        };

        if let Some(req_id) = update.req_id {
            if let Some(value) = update.d.value(FIRMWARE_FIELD) {
                match serde_json::from_value::<DeviceFirmware>(value.clone()) {
                    Ok(firmware) => self.firmware.replace(firmware),
                    Err(e) => warn!("Invalid firmware record: {e}"),
                }
            }
            self.responder.respond(req_id, CHANGED, "");
            return;
        }

        match update.d.value(METADATA_FIELD) {
            Some(Value::Object(metadata)) => {
                info!("Device metadata replaced");
                *lock(&self.metadata) = metadata.clone().into_iter().collect();
            }
            Some(_) => warn!("Ignoring metadata which is not an object"),
            None => {}
        }
    }

    fn on_device_action(&self, topic: &str, payload: &[u8], action: DeviceAction) {
        let Some(request) = parse::<ActionRequest>(topic, payload) else {
            return;
        };
        info!("Device action `{action}` requested: {}", request.req_id);

        let Some(callback) = self.handlers.device_action.clone() else {
            self.responder
                .respond(request.req_id, NOT_IMPLEMENTED, NOT_IMPLEMENTED_MESSAGE);
            return;
        };

        let responder = self.responder.clone();
        let req_id = request.req_id;
        self.runtime.spawn_blocking(move || {
            let responded = Arc::new(AtomicBool::new(false));
            let request = DeviceActionRequest {
                req_id: req_id.clone(),
                action,
                responder: responder.clone(),
                responded: Arc::clone(&responded),
            };
            let panicked = catch_unwind(AssertUnwindSafe(|| callback(request))).is_err();
            let responded = responded.load(Ordering::SeqCst);
            match (panicked, responded) {
                (true, false) => {
                    error!("Device action `{action}` callback panicked");
                    responder.respond(req_id, INTERNAL_ERROR, UNEXPECTED_ERROR);
                }
                (true, true) => {
                    error!("Device action `{action}` callback panicked after responding");
                }
                (false, _) => {}
            }
        });
    }

    fn on_firmware_action(&self, topic: &str, payload: &[u8], action: FirmwareAction) {
        let Some(request) = parse::<ActionRequest>(topic, payload) else {
            return;
        };

        let Some(firmware) = self.firmware.accept(action) else {
            info!("Firmware {action} rejected: {}", request.req_id);
            self.responder
                .respond(request.req_id, BAD_REQUEST, action.rejection_message());
            return;
        };

        info!("Firmware {action} accepted: {}", request.req_id);
        self.responder.respond(request.req_id, ACCEPTED, "");

        let Some(callback) = self.handlers.firmware.clone() else {
            warn!("No firmware action callback registered");
            return;
        };

        let request = FirmwareRequest::new(action, firmware, self.firmware.clone());
        self.runtime.spawn_blocking(move || {
            if catch_unwind(AssertUnwindSafe(|| callback(request))).is_err() {
                error!("Firmware {action} callback panicked");
            }
        });
    }

    fn on_dme_action(&self, topic: &str, payload: &[u8], action: String) {
        let Some(request) = parse::<ActionRequest>(topic, payload) else {
            return;
        };
        info!("Extension action `{action}` requested: {}", request.req_id);

        let Some(callback) = self.handlers.dme.clone() else {
            self.responder
                .respond(request.req_id, NOT_IMPLEMENTED, NOT_IMPLEMENTED_MESSAGE);
            return;
        };

        let responder = self.responder.clone();
        let request = DmeRequest {
            action,
            req_id: request.req_id,
            data: request.d,
        };
        self.runtime.spawn_blocking(move || {
            let (rc, message) = match catch_unwind(AssertUnwindSafe(|| callback(&request))) {
                Ok(true) => (OK, DME_SUCCESS),
                Ok(false) => (INTERNAL_ERROR, UNEXPECTED_ERROR),
                Err(_) => {
                    error!("Extension action `{}` callback panicked", request.action);
                    (INTERNAL_ERROR, UNEXPECTED_ERROR)
                }
            };
            responder.respond(request.req_id, rc, message);
        });
    }

    fn on_command(&self, payload: &[u8], command: String, format: String) {
        let Some(callback) = self.handlers.command.clone() else {
            debug!("No command callback registered, `{command}` dropped");
            return;
        };

        let payload = match self.handlers.codec_registry().decode(&format, payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unable to decode command `{command}`: {e}");
                return;
            }
        };

        let command = Command {
            command,
            format,
            payload,
        };
        self.runtime.spawn_blocking(move || {
            let name = command.command.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(command))).is_err() {
                error!("Command `{name}` callback panicked");
            }
        });
    }
}
