use std::sync::{Arc, Mutex};

use tracing::info;

use wiotp::firmware::{DeviceFirmware, FirmwareAction, FirmwareState, FirmwareStatus, UpdateStatus};

use crate::responder::Responder;
use crate::sync::lock;

/// A handle to the firmware update state machine.
///
/// Every local change is immediately notified to the platform. A device
/// without a firmware record is considered idle.
#[derive(Debug, Clone)]
pub struct FirmwareHandle {
    record: Arc<Mutex<Option<DeviceFirmware>>>,
    responder: Responder,
}

impl FirmwareHandle {
    pub(crate) fn new(responder: Responder) -> Self {
        Self {
            record: Arc::new(Mutex::new(None)),
            responder,
        }
    }

    /// Returns a snapshot of the firmware record.
    ///
    /// If [`None`], the platform has not sent any firmware record yet.
    #[must_use]
    pub fn snapshot(&self) -> Option<DeviceFirmware> {
        lock(&self.record).clone()
    }

    /// Returns the current [`FirmwareState`].
    #[must_use]
    pub fn state(&self) -> FirmwareState {
        lock(&self.record)
            .as_ref()
            .map_or(FirmwareState::Idle, |firmware| firmware.state)
    }

    /// Changes the [`FirmwareState`] and notifies the platform.
    pub fn set_state(&self, state: FirmwareState) {
        lock(&self.record).get_or_insert_with(DeviceFirmware::new).state = state;
        info!("Firmware state changed to {state:?}");
        self.responder.notify_firmware(FirmwareStatus {
            state,
            update_status: None,
        });
    }

    /// Records the [`UpdateStatus`] of the last update and notifies the
    /// platform.
    ///
    /// The firmware state goes back to [`FirmwareState::Idle`].
    pub fn set_update_status(&self, update_status: UpdateStatus) {
        {
            let mut record = lock(&self.record);
            let firmware = record.get_or_insert_with(DeviceFirmware::new);
            firmware.state = FirmwareState::Idle;
            firmware.update_status = Some(update_status);
        }
        info!("Firmware update status changed to {update_status:?}");
        self.responder.notify_firmware(FirmwareStatus {
            state: FirmwareState::Idle,
            update_status: Some(update_status),
        });
    }

    // Replaces the whole record with the one sent by the platform.
    pub(crate) fn replace(&self, firmware: DeviceFirmware) {
        info!(
            "Firmware record replaced, version {}",
            firmware.version.as_deref().unwrap_or("unknown")
        );
        *lock(&self.record) = Some(firmware);
    }

    // Checks the precondition of a firmware action.
    //
    // If accepted, returns the snapshot handed to the action callback.
    pub(crate) fn accept(&self, action: FirmwareAction) -> Option<DeviceFirmware> {
        let record = lock(&self.record);
        let state = record
            .as_ref()
            .map_or(FirmwareState::Idle, |firmware| firmware.state);
        action
            .accepts(state)
            .then(|| record.clone().unwrap_or_default())
    }
}

/// A firmware action requested by the platform and already accepted.
#[derive(Debug)]
pub struct FirmwareRequest {
    action: FirmwareAction,
    firmware: DeviceFirmware,
    handle: FirmwareHandle,
}

impl FirmwareRequest {
    pub(crate) const fn new(
        action: FirmwareAction,
        firmware: DeviceFirmware,
        handle: FirmwareHandle,
    ) -> Self {
        Self {
            action,
            firmware,
            handle,
        }
    }

    /// Returns the requested [`FirmwareAction`].
    #[must_use]
    pub const fn action(&self) -> FirmwareAction {
        self.action
    }

    /// Returns the firmware record at the time of the request.
    #[must_use]
    pub const fn firmware(&self) -> &DeviceFirmware {
        &self.firmware
    }

    /// Returns the [`FirmwareHandle`] used to report progress.
    #[must_use]
    pub const fn handle(&self) -> &FirmwareHandle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use wiotp::firmware::{DeviceFirmware, FirmwareAction, FirmwareState, UpdateStatus};

    use crate::responder::{Outbound, Responder};

    use super::FirmwareHandle;

    #[test]
    fn absent_record_is_idle() {
        let (responder, _receiver) = Responder::channel();
        let handle = FirmwareHandle::new(responder);

        assert_eq!(handle.state(), FirmwareState::Idle);
        assert_eq!(
            handle.accept(FirmwareAction::Download),
            Some(DeviceFirmware::new())
        );
        assert_eq!(handle.accept(FirmwareAction::Update), None);
    }

    #[test]
    fn preconditions() {
        let (responder, _receiver) = Responder::channel();
        let handle = FirmwareHandle::new(responder);

        for (state, download, update) in [
            (FirmwareState::Idle, true, false),
            (FirmwareState::Downloading, false, false),
            (FirmwareState::Downloaded, false, true),
        ] {
            handle.set_state(state);
            assert_eq!(handle.accept(FirmwareAction::Download).is_some(), download);
            assert_eq!(handle.accept(FirmwareAction::Update).is_some(), update);
            // Checks never change the state.
            assert_eq!(handle.state(), state);
        }
    }

    #[test]
    fn local_changes_are_notified() {
        let (responder, receiver) = Responder::channel();
        let handle = FirmwareHandle::new(responder);

        handle.replace(DeviceFirmware {
            version: Some("1.1".into()),
            ..DeviceFirmware::new()
        });
        handle.set_state(FirmwareState::Downloaded);
        handle.set_update_status(UpdateStatus::Success);

        let snapshot = handle.snapshot().unwrap();
        assert_eq!(snapshot.version.as_deref(), Some("1.1"));
        assert_eq!(snapshot.state, FirmwareState::Idle);
        assert_eq!(snapshot.update_status, Some(UpdateStatus::Success));

        let notifications: Vec<_> = receiver
            .drain()
            .filter_map(|outbound| match outbound {
                Outbound::Firmware(status) => Some((status.state, status.update_status)),
                Outbound::Response(_) => None,
            })
            .collect();
        assert_eq!(
            notifications,
            [
                (FirmwareState::Downloaded, None),
                (FirmwareState::Idle, Some(UpdateStatus::Success)),
            ]
        );
    }
}
