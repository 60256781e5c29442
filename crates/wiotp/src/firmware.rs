use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::macros::integer_enum;

/// Dotted path of the firmware object in the device record.
pub const FIRMWARE_FIELD: &str = "mgmt.firmware";

integer_enum! {
    /// Firmware download state.
    pub enum FirmwareState {
        /// No download is in progress.
        Idle = 0,
        /// The firmware image is being downloaded.
        Downloading = 1,
        /// The firmware image has been downloaded and can be installed.
        Downloaded = 2,
    }
}

impl Default for FirmwareState {
    fn default() -> Self {
        Self::Idle
    }
}

integer_enum! {
    /// Outcome of the last firmware update.
    pub enum UpdateStatus {
        /// The update succeeded.
        Success = 0,
        /// The update is in progress.
        InProgress = 1,
        /// Not enough memory to perform the update.
        OutOfMemory = 2,
        /// The connection was lost while downloading the image.
        ConnectionLost = 3,
        /// The image did not pass verification.
        VerificationFailed = 4,
        /// The image is not supported by the device.
        UnsupportedImage = 5,
        /// The image `URI` is not valid.
        InvalidUri = 6,
    }
}

/// A firmware action requested by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareAction {
    /// Download the firmware image.
    Download,
    /// Install the downloaded firmware image.
    Update,
}

impl core::fmt::Display for FirmwareAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Download => "download",
            Self::Update => "update",
        }
        .fmt(f)
    }
}

impl FirmwareAction {
    /// Returns the [`FirmwareState`] required to accept the action.
    #[must_use]
    pub const fn required_state(self) -> FirmwareState {
        match self {
            Self::Download => FirmwareState::Idle,
            Self::Update => FirmwareState::Downloaded,
        }
    }

    /// Returns the message sent when the action is rejected.
    #[must_use]
    pub const fn rejection_message(self) -> &'static str {
        match self {
            Self::Download => "Cannot download as the device is not in idle state",
            Self::Update => "Firmware is still not successfully downloaded.",
        }
    }

    /// Checks whether the action can be accepted in the given state.
    #[must_use]
    pub fn accepts(self, state: FirmwareState) -> bool {
        self.required_state() == state
    }
}

/// Firmware image descriptors along with the local update state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFirmware {
    /// Firmware version.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    /// Firmware name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    /// Location of the firmware image.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub uri: Option<String>,
    /// Verifier of the firmware image, i.e. a checksum.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub verifier: Option<String>,
    /// Download state.
    #[serde(default)]
    pub state: FirmwareState,
    /// Outcome of the last update.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub update_status: Option<UpdateStatus>,
    /// Last modification time reported by the server.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_date_time: Option<String>,
}

impl DeviceFirmware {
    /// Creates an idle [`DeviceFirmware`] without descriptors.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

/// The firmware value carried by a state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareStatus {
    /// Download state.
    pub state: FirmwareState,
    /// Outcome of the last update.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub update_status: Option<UpdateStatus>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::tests::{deserialize, serialize};

    use super::{DeviceFirmware, FirmwareAction, FirmwareState, FirmwareStatus, UpdateStatus};

    #[test]
    fn integer_codes() {
        assert_eq!(serialize(FirmwareState::Downloaded), json!(2));
        assert_eq!(serialize(UpdateStatus::InvalidUri), json!(6));
        assert_eq!(FirmwareState::from_code(1), Some(FirmwareState::Downloading));
        assert_eq!(UpdateStatus::from_code(7), None);
        assert!(serde_json::from_value::<FirmwareState>(json!(3)).is_err());
    }

    #[test]
    fn firmware_preconditions() {
        assert!(FirmwareAction::Download.accepts(FirmwareState::Idle));
        assert!(!FirmwareAction::Download.accepts(FirmwareState::Downloading));
        assert!(!FirmwareAction::Download.accepts(FirmwareState::Downloaded));

        assert!(FirmwareAction::Update.accepts(FirmwareState::Downloaded));
        assert!(!FirmwareAction::Update.accepts(FirmwareState::Idle));
        assert!(!FirmwareAction::Update.accepts(FirmwareState::Downloading));
    }

    #[test]
    fn firmware_from_server() {
        let firmware = deserialize::<DeviceFirmware>(json!({
            "version": "1.1",
            "name": "core",
            "uri": "https://example.com/core-1.1.bin",
            "verifier": "abcd",
            "state": 0,
            "updateStatus": 0,
            "updatedDateTime": "2026-10-19T10:00:00Z",
        }));

        assert_eq!(firmware.version.as_deref(), Some("1.1"));
        assert_eq!(firmware.state, FirmwareState::Idle);
        assert_eq!(firmware.update_status, Some(UpdateStatus::Success));

        // Missing fields fall back to an idle firmware.
        assert_eq!(deserialize::<DeviceFirmware>(json!({})), DeviceFirmware::new());
    }

    #[test]
    fn firmware_status() {
        assert_eq!(
            serialize(FirmwareStatus {
                state: FirmwareState::Downloading,
                update_status: None,
            }),
            json!({ "state": 1 })
        );
        assert_eq!(
            serialize(FirmwareStatus {
                state: FirmwareState::Idle,
                update_status: Some(UpdateStatus::VerificationFailed),
            }),
            json!({ "state": 0, "updateStatus": 4 })
        );
    }
}
