//! HMAC-signed, optionally AES-GCM encrypted cookie values.
//!
//! Wire layout before the outer base64:
//!
//! ```text
//! timestamp|base64(nonce ‖ ciphertext  or  plaintext)|hmac-sha256(name|timestamp|payload)
//! ```
//!
//! The cookie name is authenticated but not transmitted, so a value sealed
//! for one cookie never decodes under another.

use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{Codec, CodecError, ExpiringCodec};
use crate::session::DEFAULT_MAX_AGE_SECS;

type HmacSha256 = Hmac<Sha256>;

/// Default limit on the encoded value length (browsers cap cookies near 4 KiB).
pub const DEFAULT_MAX_LENGTH: usize = 4096;

enum BlockCipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, CodecError> {
        match key.len() {
            16 => Ok(Self::Aes128(
                Aes128Gcm::new_from_slice(key).map_err(|_| CodecError::InvalidBlockKey(16))?,
            )),
            32 => Ok(Self::Aes256(
                Aes256Gcm::new_from_slice(key).map_err(|_| CodecError::InvalidBlockKey(32))?,
            )),
            len => Err(CodecError::InvalidBlockKey(len)),
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Aes128(cipher) => seal(cipher, plaintext),
            Self::Aes256(cipher) => seal(cipher, plaintext),
        }
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Aes128(cipher) => open(cipher, data),
            Self::Aes256(cipher) => open(cipher, data),
        }
    }
}

fn seal<C: Aead + AeadCore>(cipher: &C, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let nonce = C::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CodecError::Encryption(e.to_string()))?;

    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open<C: Aead + AeadCore>(cipher: &C, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let nonce_len = C::NonceSize::USIZE;
    if data.len() < nonce_len {
        return Err(CodecError::Decryption(format!(
            "ciphertext shorter than {nonce_len}-byte nonce"
        )));
    }
    let (nonce, ciphertext) = data.split_at(nonce_len);
    cipher
        .decrypt(aes_gcm::aead::Nonce::<C>::from_slice(nonce), ciphertext)
        .map_err(|e| CodecError::Decryption(e.to_string()))
}

/// One key generation: a hash key for signing and an optional block key for
/// encryption.
pub struct SecureCookie {
    hash_key: Vec<u8>,
    cipher: Option<BlockCipher>,
    max_age: i64,
    min_age: i64,
    max_length: usize,
}

impl SecureCookie {
    /// Create a codec. The block key, if given, must be 16 or 32 bytes.
    pub fn new(hash_key: &[u8], block_key: Option<&[u8]>) -> Result<Self, CodecError> {
        if hash_key.is_empty() {
            return Err(CodecError::HashKeyNotSet);
        }
        let cipher = block_key.map(BlockCipher::new).transpose()?;

        Ok(Self {
            hash_key: hash_key.to_vec(),
            cipher,
            max_age: DEFAULT_MAX_AGE_SECS,
            min_age: 0,
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// Reject values sealed less than `secs` ago. Zero disables the check.
    pub fn with_min_age(mut self, secs: i64) -> Self {
        self.min_age = secs;
        self
    }

    /// Limit on the encoded length. Zero disables the check.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn mac(&self, name: &str, timestamp: &[u8], payload: &[u8]) -> Result<HmacSha256, CodecError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hash_key)
            .map_err(|_| CodecError::HashKeyNotSet)?;
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp);
        mac.update(b"|");
        mac.update(payload);
        Ok(mac)
    }

    fn encode_at(&self, name: &str, value: &[u8], now: i64) -> Result<String, CodecError> {
        let payload = match self.cipher {
            Some(ref cipher) => cipher.encrypt(value)?,
            None => value.to_vec(),
        };
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let timestamp = now.to_string();

        let tag = self
            .mac(name, timestamp.as_bytes(), payload.as_bytes())?
            .finalize()
            .into_bytes();

        let mut sealed = Vec::with_capacity(timestamp.len() + payload.len() + tag.len() + 2);
        sealed.extend_from_slice(timestamp.as_bytes());
        sealed.push(b'|');
        sealed.extend_from_slice(payload.as_bytes());
        sealed.push(b'|');
        sealed.extend_from_slice(&tag);

        let encoded = URL_SAFE_NO_PAD.encode(sealed);
        if self.max_length != 0 && encoded.len() > self.max_length {
            return Err(CodecError::ValueTooLong {
                len: encoded.len(),
                max: self.max_length,
            });
        }
        Ok(encoded)
    }

    fn decode_at(&self, name: &str, value: &str, now: i64) -> Result<Vec<u8>, CodecError> {
        if self.max_length != 0 && value.len() > self.max_length {
            return Err(CodecError::ValueTooLong {
                len: value.len(),
                max: self.max_length,
            });
        }

        let sealed = URL_SAFE_NO_PAD.decode(value)?;
        // The tag is raw bytes and may itself contain '|'.
        let mut parts = sealed.splitn(3, |b| *b == b'|');
        let (Some(timestamp), Some(payload), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CodecError::InvalidFormat);
        };

        self.mac(name, timestamp, payload)?
            .verify_slice(tag)
            .map_err(|_| CodecError::MacInvalid)?;

        let sealed_at: i64 = std::str::from_utf8(timestamp)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(CodecError::InvalidTimestamp)?;
        if self.min_age != 0 && sealed_at > now - self.min_age {
            return Err(CodecError::TooNew);
        }
        if self.max_age != 0 && sealed_at < now - self.max_age {
            return Err(CodecError::Expired);
        }

        let payload = URL_SAFE_NO_PAD.decode(payload)?;
        match self.cipher {
            Some(ref cipher) => cipher.decrypt(&payload),
            None => Ok(payload),
        }
    }
}

impl Codec for SecureCookie {
    fn encode(&self, name: &str, value: &[u8]) -> Result<String, CodecError> {
        self.encode_at(name, value, Utc::now().timestamp())
    }

    fn decode(&self, name: &str, value: &str) -> Result<Vec<u8>, CodecError> {
        self.decode_at(name, value, Utc::now().timestamp())
    }

    fn as_expiring_mut(&mut self) -> Option<&mut dyn ExpiringCodec> {
        Some(self)
    }
}

impl ExpiringCodec for SecureCookie {
    fn max_age(&self) -> i64 {
        self.max_age
    }

    fn set_max_age(&mut self, secs: i64) {
        self.max_age = secs;
    }
}

impl std::fmt::Debug for SecureCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCookie")
            .field("encrypted", &self.is_encrypted())
            .field("max_age", &self.max_age)
            .field("min_age", &self.min_age)
            .field("max_length", &self.max_length)
            .finish_non_exhaustive()
    }
}
