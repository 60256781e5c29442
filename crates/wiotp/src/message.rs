use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use hashbrown::DefaultHashBuilder;

use indexmap::IndexMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::DeviceInfo;
use crate::firmware::{FIRMWARE_FIELD, FirmwareStatus};
use crate::response::ResponseCode;

/// Free-form metadata attached to a device record.
pub type Metadata = IndexMap<String, Value, DefaultHashBuilder>;

/// The envelope of every client-initiated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Request data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub d: Option<T>,
    /// Correlation identifier.
    #[serde(rename = "reqId")]
    pub req_id: String,
}

impl<T> Envelope<T> {
    /// Creates an [`Envelope`] carrying data.
    #[must_use]
    #[inline]
    pub fn new(req_id: impl Into<String>, d: T) -> Self {
        Self {
            d: Some(d),
            req_id: req_id.into(),
        }
    }

    /// Creates an [`Envelope`] without data.
    #[must_use]
    #[inline]
    pub fn empty(req_id: impl Into<String>) -> Self {
        Self {
            d: None,
            req_id: req_id.into(),
        }
    }
}

/// Capabilities advertised by a registration request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supports {
    /// Reboot and factory reset actions.
    pub device_actions: bool,
    /// Firmware download and update actions.
    pub firmware_actions: bool,
    /// Management-extension bundles along with their enabled flag.
    #[serde(flatten)]
    pub extensions: IndexMap<String, bool, DefaultHashBuilder>,
}

/// A registration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageRequest {
    /// Lease lifetime in seconds, `0` means infinite.
    pub lifetime: u64,
    /// Advertised capabilities.
    pub supports: Supports,
    /// Device information.
    pub device_info: DeviceInfo,
    /// Device metadata.
    pub metadata: Metadata,
}

/// An attribute change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Dotted path of the attribute.
    pub field: String,
    /// New value.
    pub value: Value,
}

/// A device location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Elevation in meters.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub elevation: Option<f64>,
    /// Accuracy in meters.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub accuracy: Option<f64>,
    /// Measurement time.
    pub measured_date_time: String,
}

/// A diagnostic error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCode {
    /// Error code.
    pub error_code: i64,
}

crate::macros::integer_enum! {
    /// Severity of a diagnostic log entry.
    pub enum LogSeverity {
        /// Informational.
        Info = 0,
        /// Warning.
        Warning = 1,
        /// Error.
        Error = 2,
    }
}

/// A diagnostic log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log message.
    pub message: String,
    /// Creation time.
    pub timestamp: String,
    /// Additional data.
    pub data: String,
    /// Severity.
    pub severity: LogSeverity,
}

/// A single attribute within a fields payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field<T> {
    /// Dotted path of the attribute.
    pub field: String,
    /// Attribute value.
    #[serde(skip_serializing_if = "Option::is_none", default = "Option::default")]
    pub value: Option<T>,
}

/// A list of attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fields<T> {
    /// Attributes.
    #[serde(default = "Vec::new")]
    pub fields: Vec<Field<T>>,
}

impl<T> Fields<T> {
    /// Returns the value of an attribute.
    ///
    /// If [`None`], the attribute is absent or has no value.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&T> {
        self.fields
            .iter()
            .find(|entry| entry.field == field)
            .and_then(|entry| entry.value.as_ref())
    }

    /// Returns an iterator over attribute paths.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|entry| entry.field.as_str())
    }
}

/// A notification which does not expect any response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification<T> {
    /// Notified attributes.
    pub d: Fields<T>,
}

impl Notification<FirmwareStatus> {
    /// Creates a firmware state notification.
    #[must_use]
    pub fn firmware(status: FirmwareStatus) -> Self {
        Self {
            d: Fields {
                fields: vec![Field {
                    field: FIRMWARE_FIELD.into(),
                    value: Some(status),
                }],
            },
        }
    }
}

/// A response to a server-initiated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Response code.
    pub rc: ResponseCode,
    /// Response message.
    pub message: String,
    /// Correlation identifier of the request.
    #[serde(rename = "reqId")]
    pub req_id: String,
}

impl ActionResponse {
    /// Creates an [`ActionResponse`].
    #[must_use]
    #[inline]
    pub fn new(req_id: impl Into<String>, rc: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            rc,
            message: message.into(),
            req_id: req_id.into(),
        }
    }
}

/// A message received on the response topic.
///
/// A message without a response code is not a correlated response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManagementResponse {
    /// Response code.
    #[serde(default)]
    pub rc: Option<ResponseCode>,
    /// Correlation identifier.
    #[serde(rename = "reqId", default)]
    pub req_id: Option<String>,
}

/// A server-initiated request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionRequest {
    /// Correlation identifier.
    #[serde(rename = "reqId")]
    pub req_id: String,
    /// Request data.
    #[serde(default)]
    pub d: Option<Value>,
}

/// A request carrying a list of attributes, i.e. an observation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldsRequest {
    /// Correlation identifier.
    #[serde(rename = "reqId")]
    pub req_id: String,
    /// Requested attributes.
    #[serde(default = "empty_fields")]
    pub d: Fields<Value>,
}

/// A notification that the device record changed on the server.
///
/// Only changes to the firmware object carry a correlation identifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceUpdate {
    /// Correlation identifier.
    #[serde(rename = "reqId", default)]
    pub req_id: Option<String>,
    /// Changed attributes.
    #[serde(default = "empty_fields")]
    pub d: Fields<Value>,
}

fn empty_fields() -> Fields<Value> {
    Fields { fields: Vec::new() }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::device::{DeviceInfo, DeviceProperty};
    use crate::firmware::{FirmwareState, FirmwareStatus, UpdateStatus};
    use crate::tests::{deserialize, serialize};

    use super::{
        ActionResponse, DeviceUpdate, Envelope, FieldsRequest, LogEntry, LogSeverity,
        ManageRequest, ManagementResponse, Metadata, Notification, Supports,
    };

    #[test]
    fn manage_request() {
        let mut supports = Supports {
            device_actions: true,
            firmware_actions: false,
            ..Supports::default()
        };
        supports.extensions.insert("example-dme-actions-v1".into(), true);

        let mut metadata = Metadata::default();
        metadata.insert("zone".into(), json!("north"));

        let request = Envelope::new(
            "b1e0",
            ManageRequest {
                lifetime: 3600,
                supports,
                device_info: DeviceInfo::new().with(DeviceProperty::Model, "T1000"),
                metadata,
            },
        );

        assert_eq!(
            serialize(&request),
            json!({
                "d": {
                    "lifetime": 3600,
                    "supports": {
                        "deviceActions": true,
                        "firmwareActions": false,
                        "example-dme-actions-v1": true,
                    },
                    "deviceInfo": { "model": "T1000" },
                    "metadata": { "zone": "north" },
                },
                "reqId": "b1e0",
            })
        );
    }

    #[test]
    fn empty_envelope() {
        assert_eq!(
            serialize(Envelope::<()>::empty("b1e0")),
            json!({ "reqId": "b1e0" })
        );
    }

    #[test]
    fn log_entry() {
        let entry = LogEntry {
            message: "Disk almost full".into(),
            timestamp: "2026-10-19T10:00:00".into(),
            data: "92%".into(),
            severity: LogSeverity::Warning,
        };

        assert_eq!(
            serialize(&entry),
            json!({
                "message": "Disk almost full",
                "timestamp": "2026-10-19T10:00:00",
                "data": "92%",
                "severity": 1,
            })
        );
    }

    #[test]
    fn firmware_notification() {
        let notification = Notification::firmware(FirmwareStatus {
            state: FirmwareState::Idle,
            update_status: Some(UpdateStatus::Success),
        });

        assert_eq!(
            serialize(&notification),
            json!({
                "d": {
                    "fields": [{
                        "field": "mgmt.firmware",
                        "value": { "state": 0, "updateStatus": 0 },
                    }]
                }
            })
        );
    }

    #[test]
    fn action_response() {
        assert_eq!(
            serialize(ActionResponse::new("r2", 500, "Unexpected device error")),
            json!({ "rc": 500, "message": "Unexpected device error", "reqId": "r2" })
        );
    }

    #[test]
    fn inbound_messages() {
        let response = deserialize::<ManagementResponse>(json!({ "rc": 200, "reqId": "r1" }));
        assert_eq!(response.rc, Some(200));
        assert_eq!(response.req_id.as_deref(), Some("r1"));

        // Not a correlated response.
        let response = deserialize::<ManagementResponse>(json!({ "reqId": "r1" }));
        assert_eq!(response.rc, None);

        let observe = deserialize::<FieldsRequest>(json!({
            "reqId": "r3",
            "d": { "fields": [{ "field": "mgmt.firmware" }] },
        }));
        assert_eq!(observe.d.names().collect::<alloc::vec::Vec<_>>(), ["mgmt.firmware"]);

        let update = deserialize::<DeviceUpdate>(json!({
            "d": { "fields": [{ "field": "metadata", "value": { "zone": "south" } }] },
        }));
        assert_eq!(update.req_id, None);
        assert_eq!(update.d.value("metadata"), Some(&json!({ "zone": "south" })));
        assert_eq!(update.d.value("mgmt.firmware"), None);
    }
}
