use alloc::borrow::Cow;
use alloc::format;
use alloc::string::String;

use log::warn;

/// The organization identifier of the quickstart service.
///
/// Quickstart organizations do not support device management.
pub const QUICKSTART_ORG: &str = "quickstart";

/// The role of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A device connecting on its own behalf.
    Device,
    /// A gateway, possibly acting on behalf of the devices attached to it.
    Gateway {
        /// Gateway type.
        type_id: Cow<'static, str>,
        /// Gateway identifier.
        device_id: Cow<'static, str>,
    },
}

/// A client identity.
///
/// The type and device identifiers name the managed device, while the
/// [`Role`] names the connection identity. For a device they coincide,
/// while a gateway may manage either itself or one of its attached devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    org_id: Cow<'static, str>,
    type_id: Cow<'static, str>,
    device_id: Cow<'static, str>,
    role: Role,
}

impl Identity {
    /// Creates a device [`Identity`].
    #[must_use]
    #[inline]
    pub fn device(
        org_id: impl Into<Cow<'static, str>>,
        type_id: impl Into<Cow<'static, str>>,
        device_id: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            type_id: type_id.into(),
            device_id: device_id.into(),
            role: Role::Device,
        }
    }

    /// Creates a gateway [`Identity`] managing the gateway itself.
    #[must_use]
    #[inline]
    pub fn gateway(
        org_id: impl Into<Cow<'static, str>>,
        type_id: impl Into<Cow<'static, str>>,
        device_id: impl Into<Cow<'static, str>>,
    ) -> Self {
        let type_id = type_id.into();
        let device_id = device_id.into();
        Self {
            org_id: org_id.into(),
            role: Role::Gateway {
                type_id: type_id.clone(),
                device_id: device_id.clone(),
            },
            type_id,
            device_id,
        }
    }

    /// Makes a gateway [`Identity`] manage one of its attached devices.
    ///
    /// A device identity cannot act on behalf of other devices, so it is
    /// returned unchanged.
    #[must_use]
    pub fn managing(
        mut self,
        type_id: impl Into<Cow<'static, str>>,
        device_id: impl Into<Cow<'static, str>>,
    ) -> Self {
        if self.role == Role::Device {
            warn!("A device identity cannot manage other devices.");
            return self;
        }
        self.type_id = type_id.into();
        self.device_id = device_id.into();
        self
    }

    /// Returns the organization identifier.
    #[must_use]
    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// Returns the type of the managed device.
    #[must_use]
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// Returns the identifier of the managed device.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the connection [`Role`].
    #[must_use]
    pub const fn role(&self) -> &Role {
        &self.role
    }

    /// Checks whether the connection belongs to a gateway.
    #[must_use]
    pub const fn is_gateway(&self) -> bool {
        matches!(self.role, Role::Gateway { .. })
    }

    /// Checks whether the identity belongs to the quickstart service.
    #[must_use]
    pub fn is_quickstart(&self) -> bool {
        self.org_id == QUICKSTART_ORG
    }

    /// Returns the client identifier used to open a connection.
    #[must_use]
    pub fn client_id(&self) -> String {
        match &self.role {
            Role::Device => format!("d:{}:{}:{}", self.org_id, self.type_id, self.device_id),
            Role::Gateway { type_id, device_id } => {
                format!("g:{}:{type_id}:{device_id}", self.org_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Identity, Role};

    #[test]
    fn device_identity() {
        let identity = Identity::device("myorg", "sensor", "dev-1");

        assert_eq!(identity.client_id(), "d:myorg:sensor:dev-1");
        assert!(!identity.is_gateway());
        assert!(!identity.is_quickstart());

        // A device cannot manage other devices.
        let unchanged = identity.clone().managing("other", "dev-2");
        assert_eq!(unchanged, identity);
    }

    #[test]
    fn gateway_identity() {
        let identity = Identity::gateway("myorg", "gw", "gw-1").managing("sensor", "dev-1");

        assert_eq!(identity.client_id(), "g:myorg:gw:gw-1");
        assert_eq!(identity.type_id(), "sensor");
        assert_eq!(identity.device_id(), "dev-1");
        assert_eq!(
            identity.role(),
            &Role::Gateway {
                type_id: "gw".into(),
                device_id: "gw-1".into(),
            }
        );
    }

    #[test]
    fn quickstart_identity() {
        assert!(Identity::device("quickstart", "sensor", "dev-1").is_quickstart());
    }
}
