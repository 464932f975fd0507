//! Per-request session registry.
//!
//! Lives in the request's extensions so repeated lookups of the same session
//! name within one request return the same decoded `Session`.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::Session;
use crate::error::SessionError;

#[derive(Debug, Clone)]
pub(crate) struct RegistryEntry {
    pub(crate) session: Session,
    /// Decode error reported when the session was first loaded.
    pub(crate) error: Option<Arc<SessionError>>,
}

/// Sessions decoded during one request, keyed by cookie name.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    pub(crate) entries: HashMap<String, RegistryEntry>,
}

impl SessionRegistry {
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered session names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.entries.values_mut().map(|entry| &mut entry.session)
    }
}
