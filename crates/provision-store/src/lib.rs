//! Session persistence for provisioning wizards.
//!
//! A store maps session identifiers to serialized traversal state. State is kept
//! as opaque JSON so the store never depends on the wizard's own types.

mod file;
mod memory;

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

/// Errors raised by session stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session id cannot be empty")]
    EmptySessionId,
    #[error("failed to access session store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode session store: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Keyed persistence of serialized session state.
pub trait SessionStore {
    fn save(&self, session_id: &str, state: &Value) -> Result<(), StoreError>;

    fn load(&self, session_id: &str) -> Result<Option<Value>, StoreError>;

    /// Removes the session; returns whether it existed.
    fn delete(&self, session_id: &str) -> Result<bool, StoreError>;

    fn list(&self) -> Result<Vec<String>, StoreError>;
}

impl<S: SessionStore + ?Sized> SessionStore for &S {
    fn save(&self, session_id: &str, state: &Value) -> Result<(), StoreError> {
        (**self).save(session_id, state)
    }

    fn load(&self, session_id: &str) -> Result<Option<Value>, StoreError> {
        (**self).load(session_id)
    }

    fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        (**self).delete(session_id)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        (**self).list()
    }
}

fn check_session_id(session_id: &str) -> Result<(), StoreError> {
    if session_id.trim().is_empty() {
        Err(StoreError::EmptySessionId)
    } else {
        Ok(())
    }
}
