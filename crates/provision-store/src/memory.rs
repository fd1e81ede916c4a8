use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::{SessionStore, StoreError, check_session_id};

/// Non-persistent store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<BTreeMap<String, Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session_id: &str, state: &Value) -> Result<(), StoreError> {
        check_session_id(session_id)?;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<Value>, StoreError> {
        check_session_id(session_id)?;
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned())
    }

    fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        check_session_id(session_id)?;
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}
