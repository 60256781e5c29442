use alloc::format;
use alloc::string::String;

use serde::{Deserialize, Serialize};

// Root of the device information fields in the device record.
const DEVICE_INFO_ROOT: &str = "deviceInfo";

/// A device information property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProperty {
    /// Serial number.
    SerialNumber,
    /// Manufacturer.
    Manufacturer,
    /// Model.
    Model,
    /// Device class.
    DeviceClass,
    /// Description.
    Description,
    /// Firmware version.
    FwVersion,
    /// Hardware version.
    HwVersion,
    /// Descriptive location.
    DescriptiveLocation,
}

impl core::fmt::Display for DeviceProperty {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.name().fmt(f)
    }
}

impl DeviceProperty {
    /// Returns the property name as it appears on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SerialNumber => "serialNumber",
            Self::Manufacturer => "manufacturer",
            Self::Model => "model",
            Self::DeviceClass => "deviceClass",
            Self::Description => "description",
            Self::FwVersion => "fwVersion",
            Self::HwVersion => "hwVersion",
            Self::DescriptiveLocation => "descriptiveLocation",
        }
    }

    /// Returns the dotted path of the property in the device record.
    #[must_use]
    pub fn field(self) -> String {
        format!("{DEVICE_INFO_ROOT}.{}", self.name())
    }
}

/// Device information.
///
/// It is sent verbatim inside a registration request. Unset properties
/// are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Serial number.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub serial_number: Option<String>,
    /// Manufacturer.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub manufacturer: Option<String>,
    /// Model.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    /// Device class.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub device_class: Option<String>,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    /// Firmware version.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fw_version: Option<String>,
    /// Hardware version.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hw_version: Option<String>,
    /// Descriptive location.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub descriptive_location: Option<String>,
}

impl DeviceInfo {
    /// Creates an empty [`DeviceInfo`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property.
    #[must_use]
    #[inline]
    pub fn with(mut self, property: DeviceProperty, value: impl Into<String>) -> Self {
        self.set(property, value);
        self
    }

    /// Changes a property.
    #[inline]
    pub fn set(&mut self, property: DeviceProperty, value: impl Into<String>) {
        *self.slot(property) = Some(value.into());
    }

    /// Returns the value of a property.
    ///
    /// If [`None`], the property is not set.
    #[must_use]
    pub fn get(&self, property: DeviceProperty) -> Option<&str> {
        match property {
            DeviceProperty::SerialNumber => self.serial_number.as_deref(),
            DeviceProperty::Manufacturer => self.manufacturer.as_deref(),
            DeviceProperty::Model => self.model.as_deref(),
            DeviceProperty::DeviceClass => self.device_class.as_deref(),
            DeviceProperty::Description => self.description.as_deref(),
            DeviceProperty::FwVersion => self.fw_version.as_deref(),
            DeviceProperty::HwVersion => self.hw_version.as_deref(),
            DeviceProperty::DescriptiveLocation => self.descriptive_location.as_deref(),
        }
    }

    fn slot(&mut self, property: DeviceProperty) -> &mut Option<String> {
        match property {
            DeviceProperty::SerialNumber => &mut self.serial_number,
            DeviceProperty::Manufacturer => &mut self.manufacturer,
            DeviceProperty::Model => &mut self.model,
            DeviceProperty::DeviceClass => &mut self.device_class,
            DeviceProperty::Description => &mut self.description,
            DeviceProperty::FwVersion => &mut self.fw_version,
            DeviceProperty::HwVersion => &mut self.hw_version,
            DeviceProperty::DescriptiveLocation => &mut self.descriptive_location,
        }
    }
}
