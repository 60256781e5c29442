use std::borrow::Cow;
use std::time::Duration;

use wiotp::device::DeviceInfo;
use wiotp::identity::Identity;
use wiotp::message::{Metadata, Supports};

use crate::error::{Error, ErrorKind, Result};

// Default platform domain.
const DEFAULT_DOMAIN: &str = "internetofthings.ibmcloud.com";

// Default broker port for plain connections.
const DEFAULT_PORT: u16 = 1883;

// Default keep-alive interval, in seconds.
const DEFAULT_KEEP_ALIVE: u64 = 60;

// Default bounded wait of the readiness gates, in seconds.
const DEFAULT_READINESS_TIMEOUT: u64 = 10;

// Default age after which an unanswered request expires, in seconds.
const DEFAULT_REQUEST_EXPIRY: u64 = 60;

// Username used for token authentication.
const TOKEN_AUTH_USERNAME: &str = "use-token-auth";

/// Minimum lease lifetime, in seconds.
///
/// Any shorter lifetime is interpreted as an infinite lease.
pub const MIN_LEASE_LIFETIME: u64 = 3600;

/// Time before the lease expiry at which the registration is renewed,
/// in seconds.
pub const LEASE_RENEWAL_MARGIN: u64 = 120;

/// Parameters of a registration request.
#[derive(Debug, Clone, PartialEq)]
pub struct ManageParams {
    lifetime: u64,
    supports: Supports,
}

impl Default for ManageParams {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ManageParams {
    /// Creates [`ManageParams`] with the given lease lifetime, in seconds.
    ///
    /// A lifetime of `0` requests an infinite lease.
    #[must_use]
    #[inline]
    pub fn new(lifetime: u64) -> Self {
        Self {
            lifetime,
            supports: Supports::default(),
        }
    }

    /// Advertises support for reboot and factory reset actions.
    #[must_use]
    #[inline]
    pub const fn device_actions(mut self) -> Self {
        self.supports.device_actions = true;
        self
    }

    /// Advertises support for firmware actions.
    #[must_use]
    #[inline]
    pub const fn firmware_actions(mut self) -> Self {
        self.supports.firmware_actions = true;
        self
    }

    /// Advertises a management-extension bundle.
    #[must_use]
    #[inline]
    pub fn extension(mut self, bundle_id: impl Into<String>, enabled: bool) -> Self {
        self.supports.extensions.insert(bundle_id.into(), enabled);
        self
    }

    /// Returns the effective lease lifetime, in seconds.
    ///
    /// Lifetimes below [`MIN_LEASE_LIFETIME`] are coerced to `0`, an
    /// infinite lease.
    #[must_use]
    pub const fn lifetime(&self) -> u64 {
        if self.lifetime < MIN_LEASE_LIFETIME {
            0
        } else {
            self.lifetime
        }
    }

    /// Returns the delay after which the registration is renewed.
    ///
    /// If [`None`], the lease is infinite and no renewal is needed.
    #[must_use]
    pub const fn renewal_period(&self) -> Option<Duration> {
        match self.lifetime() {
            0 => None,
            lifetime => Some(Duration::from_secs(lifetime - LEASE_RENEWAL_MARGIN)),
        }
    }

    /// Returns the advertised capabilities.
    #[must_use]
    pub const fn supports(&self) -> &Supports {
        &self.supports
    }
}

/// Managed client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedConfig {
    identity: Identity,
    auth_token: Option<Cow<'static, str>>,
    domain: Cow<'static, str>,
    port: u16,
    keep_alive: Duration,
    clean_start: bool,
    readiness_timeout: Duration,
    request_expiry: Duration,
    manage_params: ManageParams,
    device_info: DeviceInfo,
    metadata: Metadata,
}

impl ManagedConfig {
    /// Creates a [`ManagedConfig`] for an [`Identity`].
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            auth_token: None,
            domain: DEFAULT_DOMAIN.into(),
            port: DEFAULT_PORT,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE),
            clean_start: true,
            readiness_timeout: Duration::from_secs(DEFAULT_READINESS_TIMEOUT),
            request_expiry: Duration::from_secs(DEFAULT_REQUEST_EXPIRY),
            manage_params: ManageParams::default(),
            device_info: DeviceInfo::new(),
            metadata: Metadata::default(),
        }
    }

    /// Creates a device [`ManagedConfig`] from the environment.
    ///
    /// The identity is read from `WIOTP_IDENTITY_ORGID`,
    /// `WIOTP_IDENTITY_TYPEID` and `WIOTP_IDENTITY_DEVICEID`, the token from
    /// `WIOTP_AUTH_TOKEN`. The optional `WIOTP_OPTIONS_DOMAIN`,
    /// `WIOTP_OPTIONS_MQTT_PORT`, `WIOTP_OPTIONS_MQTT_KEEPALIVE` and
    /// `WIOTP_OPTIONS_MQTT_CLEANSTART` variables override the defaults.
    ///
    /// # Errors
    ///
    /// It fails when a required variable is missing or a variable cannot be
    /// parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            var(name).ok_or_else(|| {
                Error::new(
                    ErrorKind::Configuration,
                    format!("Missing environment variable `{name}`"),
                )
            })
        };

        let identity = Identity::device(
            required("WIOTP_IDENTITY_ORGID")?,
            required("WIOTP_IDENTITY_TYPEID")?,
            required("WIOTP_IDENTITY_DEVICEID")?,
        );
        let mut config = Self::new(identity).auth_token(required("WIOTP_AUTH_TOKEN")?);

        if let Some(domain) = var("WIOTP_OPTIONS_DOMAIN") {
            config = config.domain(domain);
        }
        if let Some(port) = var("WIOTP_OPTIONS_MQTT_PORT") {
            config = config.port(parse_var("WIOTP_OPTIONS_MQTT_PORT", &port)?);
        }
        if let Some(keep_alive) = var("WIOTP_OPTIONS_MQTT_KEEPALIVE") {
            config = config.keep_alive(Duration::from_secs(parse_var(
                "WIOTP_OPTIONS_MQTT_KEEPALIVE",
                &keep_alive,
            )?));
        }
        if let Some(clean_start) = var("WIOTP_OPTIONS_MQTT_CLEANSTART") {
            config = config.clean_start(parse_var("WIOTP_OPTIONS_MQTT_CLEANSTART", &clean_start)?);
        }

        Ok(config)
    }

    /// Sets the authentication token.
    #[must_use]
    #[inline]
    pub fn auth_token(mut self, auth_token: impl Into<Cow<'static, str>>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    /// Sets the platform domain.
    #[must_use]
    #[inline]
    pub fn domain(mut self, domain: impl Into<Cow<'static, str>>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Sets the broker port.
    #[must_use]
    #[inline]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    #[inline]
    pub const fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets whether the broker discards the previous session on connection.
    #[must_use]
    #[inline]
    pub const fn clean_start(mut self, clean_start: bool) -> Self {
        self.clean_start = clean_start;
        self
    }

    /// Sets the bounded wait of the readiness gates.
    #[must_use]
    #[inline]
    pub const fn readiness_timeout(mut self, readiness_timeout: Duration) -> Self {
        self.readiness_timeout = readiness_timeout;
        self
    }

    /// Sets the age after which an unanswered request expires.
    #[must_use]
    #[inline]
    pub const fn request_expiry(mut self, request_expiry: Duration) -> Self {
        self.request_expiry = request_expiry;
        self
    }

    /// Sets the [`ManageParams`] used whenever the client registers on its
    /// own, i.e. after every (re)connection.
    #[must_use]
    #[inline]
    pub fn manage_params(mut self, manage_params: ManageParams) -> Self {
        self.manage_params = manage_params;
        self
    }

    /// Sets the initial [`DeviceInfo`].
    #[must_use]
    #[inline]
    pub fn device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = device_info;
        self
    }

    /// Sets the initial device metadata.
    #[must_use]
    #[inline]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// It fails for quickstart organizations, which do not support device
    /// management, for empty identity components, for a missing token and
    /// for zero durations.
    pub fn validate(&self) -> Result<()> {
        if self.identity.is_quickstart() {
            return Err(Error::new(
                ErrorKind::Configuration,
                "QuickStart does not support device management",
            ));
        }

        for (name, value) in [
            ("organization", self.identity.org_id()),
            ("device type", self.identity.type_id()),
            ("device identifier", self.identity.device_id()),
        ] {
            if value.is_empty() {
                return Err(Error::new(
                    ErrorKind::Configuration,
                    format!("Empty {name} in the client identity"),
                ));
            }
        }

        if self.auth_token.as_deref().is_none_or(str::is_empty) {
            return Err(Error::new(
                ErrorKind::Configuration,
                "Missing authentication token",
            ));
        }

        if self.keep_alive.is_zero() {
            return Err(Error::new(
                ErrorKind::Configuration,
                "Keep-alive interval must be greater than zero",
            ));
        }

        if self.request_expiry.is_zero() {
            return Err(Error::new(
                ErrorKind::Configuration,
                "Request expiry must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Returns the client [`Identity`].
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> String {
        format!("{}.messaging.{}", self.identity.org_id(), self.domain)
    }

    /// Returns the broker port.
    #[must_use]
    pub const fn broker_port(&self) -> u16 {
        self.port
    }

    /// Returns the username and password used to authenticate.
    #[must_use]
    pub fn credentials(&self) -> Option<(&'static str, &str)> {
        self.auth_token
            .as_deref()
            .map(|token| (TOKEN_AUTH_USERNAME, token))
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub const fn keep_alive_interval(&self) -> Duration {
        self.keep_alive
    }

    /// Checks whether the broker discards the previous session on
    /// connection.
    #[must_use]
    pub const fn is_clean_start(&self) -> bool {
        self.clean_start
    }

    /// Returns the bounded wait of the readiness gates.
    #[must_use]
    pub const fn readiness_wait(&self) -> Duration {
        self.readiness_timeout
    }

    /// Returns the age after which an unanswered request expires.
    #[must_use]
    pub const fn request_max_age(&self) -> Duration {
        self.request_expiry
    }

    /// Returns the default [`ManageParams`].
    #[must_use]
    pub const fn default_manage_params(&self) -> &ManageParams {
        &self.manage_params
    }

    pub(crate) const fn initial_device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub(crate) const fn initial_metadata(&self) -> &Metadata {
        &self.metadata
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::new(
            ErrorKind::Configuration,
            format!("Invalid value `{value}` for environment variable `{name}`"),
        )
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hashbrown::HashMap;

    use wiotp::identity::Identity;

    use crate::error::ErrorKind;

    use super::{ManageParams, ManagedConfig};

    fn vars(entries: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        entries.iter().copied().collect()
    }

    fn device_config() -> ManagedConfig {
        ManagedConfig::new(Identity::device("myorg", "sensor", "dev-1")).auth_token("secret")
    }

    #[test]
    fn lease_coercion() {
        let params = ManageParams::new(3599);
        assert_eq!(params.lifetime(), 0);
        assert_eq!(params.renewal_period(), None);

        let params = ManageParams::new(0);
        assert_eq!(params.renewal_period(), None);

        let params = ManageParams::new(3600);
        assert_eq!(params.lifetime(), 3600);
        assert_eq!(params.renewal_period(), Some(Duration::from_secs(3480)));
    }

    #[test]
    fn manage_params() {
        let params = ManageParams::new(3600)
            .device_actions()
            .extension("example-dme-actions-v1", true);

        assert!(params.supports().device_actions);
        assert!(!params.supports().firmware_actions);
        assert_eq!(
            params.supports().extensions.get("example-dme-actions-v1"),
            Some(&true)
        );
    }

    #[test]
    fn valid_config() {
        let config = device_config();

        assert!(config.validate().is_ok());
        assert_eq!(config.host(), "myorg.messaging.internetofthings.ibmcloud.com");
        assert_eq!(config.broker_port(), 1883);
        assert_eq!(config.credentials(), Some(("use-token-auth", "secret")));
        assert_eq!(config.readiness_wait(), Duration::from_secs(10));
        assert_eq!(config.request_max_age(), Duration::from_secs(60));
    }

    #[test]
    fn invalid_config() {
        let quickstart =
            ManagedConfig::new(Identity::device("quickstart", "sensor", "dev-1")).auth_token("t");
        assert_eq!(
            quickstart.validate().unwrap_err().kind(),
            ErrorKind::Configuration
        );

        let empty_device = ManagedConfig::new(Identity::device("myorg", "sensor", "")).auth_token("t");
        assert_eq!(
            empty_device.validate().unwrap_err().kind(),
            ErrorKind::Configuration
        );

        let no_token = ManagedConfig::new(Identity::device("myorg", "sensor", "dev-1"));
        assert_eq!(
            no_token.validate().unwrap_err().kind(),
            ErrorKind::Configuration
        );

        let no_keep_alive = device_config().keep_alive(Duration::ZERO);
        assert_eq!(
            no_keep_alive.validate().unwrap_err().kind(),
            ErrorKind::Configuration
        );

        let no_expiry = device_config().request_expiry(Duration::ZERO);
        assert_eq!(
            no_expiry.validate().unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn config_from_vars() {
        let vars = vars(&[
            ("WIOTP_IDENTITY_ORGID", "myorg"),
            ("WIOTP_IDENTITY_TYPEID", "sensor"),
            ("WIOTP_IDENTITY_DEVICEID", "dev-1"),
            ("WIOTP_AUTH_TOKEN", "secret"),
            ("WIOTP_OPTIONS_DOMAIN", "example.com"),
            ("WIOTP_OPTIONS_MQTT_PORT", "8883"),
            ("WIOTP_OPTIONS_MQTT_KEEPALIVE", "30"),
            ("WIOTP_OPTIONS_MQTT_CLEANSTART", "false"),
        ]);

        let config = ManagedConfig::from_vars(|name| vars.get(name).map(|v| (*v).into())).unwrap();

        assert_eq!(config.identity(), &Identity::device("myorg", "sensor", "dev-1"));
        assert_eq!(config.host(), "myorg.messaging.example.com");
        assert_eq!(config.broker_port(), 8883);
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(30));
        assert!(!config.is_clean_start());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_invalid_vars() {
        let missing = vars(&[("WIOTP_IDENTITY_ORGID", "myorg")]);
        assert_eq!(
            ManagedConfig::from_vars(|name| missing.get(name).map(|v| (*v).into()))
                .unwrap_err()
                .kind(),
            ErrorKind::Configuration
        );

        let bad_port = vars(&[
            ("WIOTP_IDENTITY_ORGID", "myorg"),
            ("WIOTP_IDENTITY_TYPEID", "sensor"),
            ("WIOTP_IDENTITY_DEVICEID", "dev-1"),
            ("WIOTP_AUTH_TOKEN", "secret"),
            ("WIOTP_OPTIONS_MQTT_PORT", "eighty"),
        ]);
        assert_eq!(
            ManagedConfig::from_vars(|name| bad_port.get(name).map(|v| (*v).into()))
                .unwrap_err()
                .kind(),
            ErrorKind::Configuration
        );
    }
}
