//! Payload codecs used to seal session identifiers and values.
//!
//! A store holds an ordered list of codecs, one per key generation. Encoding
//! uses the first codec that succeeds; decoding tries each in turn so cookies
//! sealed under an older generation keep working during key rotation.

pub mod secure;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use secure::{SecureCookie, DEFAULT_MAX_LENGTH};

/// Codec failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("hash key is not set")]
    HashKeyNotSet,

    #[error("block key must be 16 or 32 bytes, got {0}")]
    InvalidBlockKey(usize),

    #[error("no codecs configured")]
    NoCodecs,

    #[error("value could not be serialized: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("value could not be deserialized: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("value is not in timestamp|payload|mac form")]
    InvalidFormat,

    #[error("the value is not valid (MAC mismatch)")]
    MacInvalid,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("timestamp is too new")]
    TooNew,

    #[error("timestamp is expired")]
    Expired,

    #[error("value is too long ({len} > {max})")]
    ValueTooLong { len: usize, max: usize },

    /// Every key generation failed.
    #[error("{}", join_errors(.0))]
    Multi(Vec<CodecError>),
}

fn join_errors(errors: &[CodecError]) -> String {
    match errors {
        [] => "no codecs configured".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} other errors)", first, rest.len()),
    }
}

/// Seals bytes into an opaque cookie-safe string and back.
pub trait Codec: Send + Sync {
    fn encode(&self, name: &str, value: &[u8]) -> Result<String, CodecError>;

    fn decode(&self, name: &str, value: &str) -> Result<Vec<u8>, CodecError>;

    /// Access to the embedded-expiry capability, if this codec has one.
    fn as_expiring_mut(&mut self) -> Option<&mut dyn ExpiringCodec> {
        None
    }
}

/// Codecs whose sealed output carries its own lifetime.
pub trait ExpiringCodec {
    fn max_age(&self) -> i64;

    fn set_max_age(&mut self, secs: i64);
}

/// Key material for one generation.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub hash_key: Vec<u8>,
    pub block_key: Option<Vec<u8>>,
}

impl KeyPair {
    pub fn new(hash_key: impl Into<Vec<u8>>, block_key: Option<Vec<u8>>) -> Self {
        Self {
            hash_key: hash_key.into(),
            block_key,
        }
    }

    /// Parse `hashhex[:blockhex]`.
    pub fn from_hex_pair(pair: &str) -> anyhow::Result<Self> {
        let (hash, block) = match pair.trim().split_once(':') {
            Some((hash, block)) => (hash, Some(block)),
            None => (pair.trim(), None),
        };
        let hash_key = hex::decode(hash)
            .map_err(|e| anyhow::anyhow!("invalid hash key hex: {e}"))?;
        let block_key = block
            .filter(|b| !b.is_empty())
            .map(hex::decode)
            .transpose()
            .map_err(|e| anyhow::anyhow!("invalid block key hex: {e}"))?;
        Ok(Self { hash_key, block_key })
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("hash_key", &"<redacted>")
            .field("encrypted", &self.block_key.is_some())
            .finish()
    }
}

/// Build one `SecureCookie` per key generation, newest first.
pub fn codecs_from_pairs(pairs: &[KeyPair]) -> Result<Vec<Box<dyn Codec>>, CodecError> {
    pairs
        .iter()
        .map(|pair| {
            SecureCookie::new(&pair.hash_key, pair.block_key.as_deref())
                .map(|codec| Box::new(codec) as Box<dyn Codec>)
        })
        .collect()
}

/// Serialize `value` and seal it with the first codec that succeeds.
pub fn encode_multi<T: Serialize + ?Sized>(
    name: &str,
    value: &T,
    codecs: &[Box<dyn Codec>],
) -> Result<String, CodecError> {
    if codecs.is_empty() {
        return Err(CodecError::NoCodecs);
    }
    let bytes = serde_json::to_vec(value).map_err(CodecError::Serialize)?;

    let mut errors = Vec::new();
    for codec in codecs {
        match codec.encode(name, &bytes) {
            Ok(encoded) => return Ok(encoded),
            Err(e) => errors.push(e),
        }
    }
    Err(CodecError::Multi(errors))
}

/// Unseal `value` with each codec in order and deserialize the first success.
pub fn decode_multi<T: DeserializeOwned>(
    name: &str,
    value: &str,
    codecs: &[Box<dyn Codec>],
) -> Result<T, CodecError> {
    if codecs.is_empty() {
        return Err(CodecError::NoCodecs);
    }

    let mut errors = Vec::new();
    for codec in codecs {
        match codec.decode(name, value) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(decoded) => return Ok(decoded),
                Err(e) => errors.push(CodecError::Deserialize(e)),
            },
            Err(e) => errors.push(e),
        }
    }
    Err(CodecError::Multi(errors))
}
