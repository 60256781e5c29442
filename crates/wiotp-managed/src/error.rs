use std::borrow::Cow;

use tracing::error;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ErrorKind {
    /// Errors caused by an invalid client configuration.
    Configuration,
    /// Errors encountered while publishing or subscribing.
    Transport,
    /// Errors encountered while serializing a message.
    Serialization,
    /// Errors encountered while encoding or decoding a payload.
    Codec,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Configuration => "Configuration",
            Self::Transport => "Transport",
            Self::Serialization => "Serialization",
            Self::Codec => "Codec",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// Managed client error.
#[derive(PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        let description = description.into();
        error!("{}", description.as_ref());
        Self { kind, description }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn format(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization, e.to_string())
    }
}

impl From<rumqttc::v5::ClientError> for Error {
    fn from(e: rumqttc::v5::ClientError) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

impl From<wiotp::error::Error> for Error {
    fn from(e: wiotp::error::Error) -> Self {
        Self::new(ErrorKind::Codec, e.to_string())
    }
}

impl std::error::Error for Error {}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use wiotp::error::{Error as ProtocolError, ErrorKind as ProtocolErrorKind};

    use super::{Error, ErrorKind};

    #[test]
    fn managed_error() {
        let error = Error::new(ErrorKind::Configuration, "Missing authentication token.");

        assert_eq!(
            error.to_string(),
            r"Configuration: Missing authentication token."
        );
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn protocol_error() {
        let error: Error =
            ProtocolError::new(ProtocolErrorKind::MissingCodec, "No codec for `xml`.").into();

        assert_eq!(error.kind(), ErrorKind::Codec);
        assert_eq!(error.to_string(), r"Codec: Missing Codec: No codec for `xml`.");
    }
}
