use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::identity::{Identity, Role};

// Prefix of the topics published by a managed client.
const OUTBOUND_PREFIX: &str = "iotdevice-1";

// Prefix of the topics published by the device-management server.
const INBOUND_PREFIX: &str = "iotdm-1";

// Prefix of event and command topics.
const EVENTS_PREFIX: &str = "iot-2";

// Path prefix of management-extension actions.
const CUSTOM_ACTION_PREFIX: &str = "mgmt/custom/";

/// Topics a managed client publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundTopic {
    /// Registers a client for device management.
    Manage,
    /// Deregisters a client from device management.
    Unmanage,
    /// Updates the device location.
    UpdateLocation,
    /// Adds a diagnostic error code.
    AddErrorCode,
    /// Clears all diagnostic error codes.
    ClearErrorCodes,
    /// Adds a diagnostic log entry.
    AddLog,
    /// Clears all diagnostic log entries.
    ClearLog,
    /// Notifies an attribute change.
    Notify,
    /// Answers a server-initiated request.
    Response,
}

impl OutboundTopic {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Manage => "mgmt/manage",
            Self::Unmanage => "mgmt/unmanage",
            Self::UpdateLocation => "device/update/location",
            Self::AddErrorCode => "add/diag/errorCodes",
            Self::ClearErrorCodes => "clear/diag/errorCodes",
            Self::AddLog => "add/diag/log",
            Self::ClearLog => "clear/diag/log",
            Self::Notify => "notify",
            Self::Response => "response",
        }
    }
}

/// Topics the device-management server publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundTopic {
    /// Responses to client-initiated requests.
    Response,
    /// Requests to observe attributes.
    Observe,
    /// Reboot requests.
    Reboot,
    /// Factory reset requests.
    FactoryReset,
    /// Notifications about changes to the device record.
    DeviceUpdate,
    /// Requests to cancel an observation.
    CancelObserve,
    /// Firmware download requests.
    FirmwareDownload,
    /// Firmware update requests.
    FirmwareUpdate,
    /// Management-extension actions.
    ///
    /// This topic is a subscription wildcard.
    Custom,
}

impl InboundTopic {
    /// All inbound topics.
    pub const ALL: [Self; 9] = [
        Self::Response,
        Self::Observe,
        Self::Reboot,
        Self::FactoryReset,
        Self::DeviceUpdate,
        Self::CancelObserve,
        Self::FirmwareDownload,
        Self::FirmwareUpdate,
        Self::Custom,
    ];

    const fn suffix(self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::Observe => "observe",
            Self::Reboot => "mgmt/initiate/device/reboot",
            Self::FactoryReset => "mgmt/initiate/device/factory_reset",
            Self::DeviceUpdate => "device/update",
            Self::CancelObserve => "cancel",
            Self::FirmwareDownload => "mgmt/initiate/firmware/download",
            Self::FirmwareUpdate => "mgmt/initiate/firmware/update",
            Self::Custom => "mgmt/custom/#",
        }
    }
}

/// A classified inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A response to a client-initiated request.
    Response,
    /// An observation request.
    Observe,
    /// A reboot request.
    Reboot,
    /// A factory reset request.
    FactoryReset,
    /// A device record change.
    DeviceUpdate,
    /// An observation cancellation.
    CancelObserve,
    /// A firmware download request.
    FirmwareDownload,
    /// A firmware update request.
    FirmwareUpdate,
    /// A management-extension action.
    Custom {
        /// Action path below the custom prefix, i.e. `bundle/action`.
        action: String,
    },
    /// A device command.
    Command {
        /// Command name.
        command: String,
        /// Payload format.
        format: String,
    },
}

fn scoped(prefix: &str, identity: &Identity) -> String {
    match identity.role() {
        Role::Device => prefix.to_string(),
        Role::Gateway { .. } => format!(
            "{prefix}/type/{}/id/{}",
            identity.type_id(),
            identity.device_id()
        ),
    }
}

/// Returns the concrete topic for an [`OutboundTopic`].
#[must_use]
pub fn outbound_topic(topic: OutboundTopic, identity: &Identity) -> String {
    format!("{}/{}", scoped(OUTBOUND_PREFIX, identity), topic.suffix())
}

/// Returns the concrete topic for an [`InboundTopic`].
#[must_use]
pub fn inbound_topic(topic: InboundTopic, identity: &Identity) -> String {
    format!("{}/{}", scoped(INBOUND_PREFIX, identity), topic.suffix())
}

/// Returns the topic an event is published on.
#[must_use]
pub fn event_topic(identity: &Identity, event: &str, format: &str) -> String {
    format!("{}/evt/{event}/fmt/{format}", scoped(EVENTS_PREFIX, identity))
}

/// Returns the subscription topic for device commands.
#[must_use]
pub fn command_subscription(identity: &Identity) -> String {
    format!("{}/cmd/+/fmt/+", scoped(EVENTS_PREFIX, identity))
}

/// Returns all topics a managed client subscribes to.
#[must_use]
pub fn subscriptions(identity: &Identity) -> Vec<String> {
    InboundTopic::ALL
        .into_iter()
        .map(|topic| inbound_topic(topic, identity))
        .chain(core::iter::once(command_subscription(identity)))
        .collect()
}

/// Classifies a concrete topic received by the client.
///
/// If [`None`], the topic does not belong to the given identity.
#[must_use]
pub fn classify(identity: &Identity, topic: &str) -> Option<Inbound> {
    let management = scoped(INBOUND_PREFIX, identity);
    if let Some(path) = strip_scope(topic, &management) {
        return classify_management(path);
    }

    let events = scoped(EVENTS_PREFIX, identity);
    let path = strip_scope(topic, &events)?;
    let mut levels = path.split('/');
    match (
        levels.next(),
        levels.next(),
        levels.next(),
        levels.next(),
        levels.next(),
    ) {
        (Some("cmd"), Some(command), Some("fmt"), Some(format), None)
            if !command.is_empty() && !format.is_empty() =>
        {
            Some(Inbound::Command {
                command: command.into(),
                format: format.into(),
            })
        }
        _ => None,
    }
}

fn strip_scope<'a>(topic: &'a str, scope: &str) -> Option<&'a str> {
    topic.strip_prefix(scope)?.strip_prefix('/')
}

fn classify_management(path: &str) -> Option<Inbound> {
    if let Some(action) = path.strip_prefix(CUSTOM_ACTION_PREFIX) {
        let concrete = !action.is_empty() && !action.contains(|c| c == '#' || c == '+');
        return concrete.then(|| Inbound::Custom {
            action: action.into(),
        });
    }

    let inbound = InboundTopic::ALL
        .into_iter()
        .find(|topic| topic.suffix() == path)?;

    Some(match inbound {
        InboundTopic::Response => Inbound::Response,
        InboundTopic::Observe => Inbound::Observe,
        InboundTopic::Reboot => Inbound::Reboot,
        InboundTopic::FactoryReset => Inbound::FactoryReset,
        InboundTopic::DeviceUpdate => Inbound::DeviceUpdate,
        InboundTopic::CancelObserve => Inbound::CancelObserve,
        InboundTopic::FirmwareDownload => Inbound::FirmwareDownload,
        InboundTopic::FirmwareUpdate => Inbound::FirmwareUpdate,
        // The wildcard itself is never a concrete topic.
        InboundTopic::Custom => return None,
    })
}
