//! Session values, identifiers and cookie options.

pub mod id;
pub mod options;
pub mod registry;
pub mod types;

pub use id::SessionId;
pub use options::{CookieOptions, CookieOptionsJson, SameSite, DEFAULT_MAX_AGE_SECS};
pub use registry::SessionRegistry;
pub use types::{Session, SessionValues};
