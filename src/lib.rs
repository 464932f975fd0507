//! Zentinel Session Store
//!
//! Server-side HTTP sessions for Zentinel services. Session values are
//! sealed and kept in a document repository; the client only holds a
//! signed (optionally encrypted) cookie carrying the session identifier.
//!
//! The three calls a handler makes are [`SessionStore::get`] (or
//! [`SessionStore::new_session`] to bypass the per-request registry), mutate
//! [`Session::values`], then [`SessionStore::save`].

pub mod codec;
pub mod cookie;
pub mod error;
pub mod repository;
pub mod session;
pub mod store;

pub use codec::{Codec, CodecError, ExpiringCodec, KeyPair, SecureCookie};
pub use error::SessionError;
pub use repository::{DocumentRepository, MemoryRepository, RedbRepository, StoredDocument};
pub use session::{CookieOptions, CookieOptionsJson, SameSite, Session, SessionId, SessionRegistry};
pub use store::SessionStore;
