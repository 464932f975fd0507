//! The per-request session value.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::id::SessionId;
use super::options::CookieOptions;

/// Session values as sealed into the stored document.
pub type SessionValues = HashMap<String, Value>;

/// A named session bound to one request/response cycle.
#[derive(Debug, Clone)]
pub struct Session {
    name: String,

    /// Assigned on first save; `None` for sessions never persisted.
    pub(crate) id: Option<SessionId>,

    /// User values.
    pub values: SessionValues,

    /// Cookie options, copied from the store defaults.
    pub options: CookieOptions,

    /// True until a stored document has been loaded and decoded.
    pub is_new: bool,
}

impl Session {
    /// Create an empty, new session.
    pub fn new(name: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            id: None,
            values: HashMap::new(),
            options,
            is_new: true,
        }
    }

    /// Cookie name this session is stored under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<SessionId> {
        self.id
    }

    /// Get a typed value. Returns `None` if missing or of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Insert a value, replacing any previous one under `key`.
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.values.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Mark the session for deletion on the next save.
    pub fn invalidate(&mut self) {
        self.options.max_age = -1;
    }
}
