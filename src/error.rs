//! Session lifecycle errors.

use crate::codec::CodecError;
use crate::session::SessionId;

/// Errors returned by [`SessionStore`](crate::SessionStore).
///
/// The decode-path variants (`CookieDecode`, `DocumentNotFound`,
/// `PayloadDecode`, `IdentityFormat`) are reported alongside a usable fresh
/// session. `Encode`, `InvalidHeader` and `Repository` abort a save before any cookie is set.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Cookie forged, expired or sealed with an unknown key generation.
    #[error("session cookie could not be decoded: {0}")]
    CookieDecode(#[source] CodecError),

    #[error("session document not found: {0}")]
    DocumentNotFound(SessionId),

    /// Stored payload failed authentication or decryption.
    #[error("session payload could not be decoded: {0}")]
    PayloadDecode(#[source] CodecError),

    #[error("malformed session identifier: {0}")]
    IdentityFormat(String),

    #[error("session could not be encoded: {0}")]
    Encode(#[source] CodecError),

    /// Cookie attributes that cannot form a `Set-Cookie` header.
    #[error("invalid Set-Cookie header: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// Storage failure, passed through untouched.
    #[error(transparent)]
    Repository(anyhow::Error),
}

impl SessionError {
    /// True for errors that only mean "treat the session as new".
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            SessionError::CookieDecode(_)
                | SessionError::DocumentNotFound(_)
                | SessionError::PayloadDecode(_)
                | SessionError::IdentityFormat(_)
        )
    }
}
