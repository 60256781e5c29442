use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;

use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};

/// Format name of the `JSON` codec.
pub const JSON_FORMAT: &str = "json";

/// Format name of the raw bytes codec.
pub const RAW_FORMAT: &str = "raw";

/// Format name of the `UTF-8` text codec.
pub const UTF8_FORMAT: &str = "utf8";

/// An event or command payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A `JSON` value.
    Json(Value),
    /// Raw bytes.
    Raw(Vec<u8>),
    /// `UTF-8` text.
    Text(String),
}

/// Encodes and decodes payloads of a message format.
pub trait Codec {
    /// Encodes a [`Payload`] into bytes.
    ///
    /// # Errors
    ///
    /// It fails whenever the payload cannot be represented by the format.
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>>;

    /// Decodes bytes into a [`Payload`].
    ///
    /// # Errors
    ///
    /// It fails whenever the bytes are not valid for the format.
    fn decode(&self, bytes: &[u8]) -> Result<Payload>;
}

/// The `JSON` codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        match payload {
            Payload::Json(value) => serde_json::to_vec(value)
                .map_err(|e| Error::new(ErrorKind::Encode, format!("{e}"))),
            // Text is accepted only when it already contains JSON.
            Payload::Text(text) => {
                serde_json::from_str::<Value>(text)?;
                Ok(text.as_bytes().into())
            }
            Payload::Raw(_) => Err(Error::new(
                ErrorKind::Encode,
                "Raw bytes cannot be encoded as JSON",
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Payload> {
        Ok(Payload::Json(serde_json::from_slice(bytes)?))
    }
}

/// The raw bytes codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        match payload {
            Payload::Raw(bytes) => Ok(bytes.clone()),
            Payload::Text(text) => Ok(text.as_bytes().into()),
            Payload::Json(_) => Err(Error::new(
                ErrorKind::Encode,
                "A JSON value cannot be encoded as raw bytes",
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Payload> {
        Ok(Payload::Raw(bytes.into()))
    }
}

/// The `UTF-8` text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec for Utf8Codec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        match payload {
            Payload::Text(text) => Ok(text.as_bytes().into()),
            _ => Err(Error::new(
                ErrorKind::Encode,
                "Only text can be encoded as UTF-8",
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Payload> {
        core::str::from_utf8(bytes)
            .map(|text| Payload::Text(text.into()))
            .map_err(|e| Error::new(ErrorKind::Decode, format!("{e}")))
    }
}

/// A registry mapping message formats to their [`Codec`].
pub struct CodecRegistry(HashMap<Cow<'static, str>, Box<dyn Codec + Send + Sync>>);

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl CodecRegistry {
    /// Creates a [`CodecRegistry`] containing the `json`, `raw` and `utf8`
    /// codecs.
    #[must_use]
    pub fn new() -> Self {
        Self::empty()
            .codec(JSON_FORMAT, JsonCodec)
            .codec(RAW_FORMAT, RawCodec)
            .codec(UTF8_FORMAT, Utf8Codec)
    }

    /// Creates an empty [`CodecRegistry`].
    #[must_use]
    #[inline]
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Adds a [`Codec`] for a message format.
    #[must_use]
    #[inline]
    pub fn codec(
        mut self,
        format: impl Into<Cow<'static, str>>,
        codec: impl Codec + Send + Sync + 'static,
    ) -> Self {
        self.register(format, codec);
        self
    }

    /// Registers a [`Codec`] for a message format, replacing any previous
    /// codec for the same format.
    pub fn register(
        &mut self,
        format: impl Into<Cow<'static, str>>,
        codec: impl Codec + Send + Sync + 'static,
    ) {
        self.0.insert(format.into(), Box::new(codec));
    }

    /// Returns the [`Codec`] of a message format.
    #[must_use]
    pub fn get(&self, format: &str) -> Option<&(dyn Codec + Send + Sync)> {
        self.0.get(format).map(AsRef::as_ref)
    }

    /// Checks whether a codec is registered for a message format.
    #[must_use]
    pub fn contains(&self, format: &str) -> bool {
        self.0.contains_key(format)
    }

    /// Encodes a [`Payload`] with the codec of a message format.
    ///
    /// # Errors
    ///
    /// It fails when no codec is registered for the format or when the codec
    /// cannot encode the payload.
    pub fn encode(&self, format: &str, payload: &Payload) -> Result<Vec<u8>> {
        self.lookup(format)?.encode(payload)
    }

    /// Decodes bytes with the codec of a message format.
    ///
    /// # Errors
    ///
    /// It fails when no codec is registered for the format or when the codec
    /// cannot decode the bytes.
    pub fn decode(&self, format: &str, bytes: &[u8]) -> Result<Payload> {
        self.lookup(format)?.decode(bytes)
    }

    fn lookup(&self, format: &str) -> Result<&(dyn Codec + Send + Sync)> {
        self.get(format).ok_or_else(|| {
            Error::new(
                ErrorKind::MissingCodec,
                format!("No codec registered for format `{format}`"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use serde_json::json;

    use crate::error::{ErrorKind, Result};

    use super::{Codec, CodecRegistry, Payload};

    struct UpperCodec;

    impl Codec for UpperCodec {
        fn encode(&self, payload: &Payload) -> Result<alloc::vec::Vec<u8>> {
            match payload {
                Payload::Text(text) => Ok(text.to_uppercase().into_bytes()),
                _ => Ok(vec![]),
            }
        }

        fn decode(&self, bytes: &[u8]) -> Result<Payload> {
            Ok(Payload::Text(
                alloc::string::String::from_utf8_lossy(bytes).to_lowercase(),
            ))
        }
    }

    #[test]
    fn default_codecs() {
        let registry = CodecRegistry::new();

        assert_eq!(
            registry
                .encode("json", &Payload::Json(json!({ "temp": 21 })))
                .unwrap(),
            br#"{"temp":21}"#
        );
        assert_eq!(
            registry.decode("json", br#"{"temp":21}"#).unwrap(),
            Payload::Json(json!({ "temp": 21 }))
        );
        assert_eq!(
            registry.decode("raw", &[0, 159]).unwrap(),
            Payload::Raw(vec![0, 159])
        );
        assert_eq!(
            registry.decode("utf8", b"on").unwrap(),
            Payload::Text("on".into())
        );
    }

    #[test]
    fn codec_errors() {
        let registry = CodecRegistry::new();

        assert_eq!(
            registry
                .encode("xml", &Payload::Text("<a/>".into()))
                .unwrap_err()
                .kind(),
            ErrorKind::MissingCodec
        );
        assert_eq!(
            registry.decode("json", b"{").unwrap_err().kind(),
            ErrorKind::Decode
        );
        assert_eq!(
            registry.decode("utf8", &[0xff, 0xfe]).unwrap_err().kind(),
            ErrorKind::Decode
        );
        assert_eq!(
            registry
                .encode("utf8", &Payload::Raw(vec![1]))
                .unwrap_err()
                .kind(),
            ErrorKind::Encode
        );
    }

    #[test]
    fn override_codec() {
        let mut registry = CodecRegistry::empty();
        assert!(!registry.contains("utf8"));

        registry.register("utf8", UpperCodec);

        assert_eq!(
            registry
                .encode("utf8", &Payload::Text("on".into()))
                .unwrap(),
            b"ON"
        );
        assert_eq!(
            registry.decode("utf8", b"OFF").unwrap(),
            Payload::Text("off".into())
        );
    }
}
