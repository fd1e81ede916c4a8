use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{SessionStore, StoreError, check_session_id};

/// JSON file holding every session of one store, rewritten atomically on change.
///
/// Writes go to a temporary file in the same directory which is then renamed over
/// the store file, so readers see either the old or the new map, never a torn one.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, sessions: &Map<String, Value>) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let bytes = serde_json::to_vec_pretty(sessions).map_err(StoreError::Encode)?;
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, session_id: &str, state: &Value) -> Result<(), StoreError> {
        check_session_id(session_id)?;
        let mut sessions = self.read_all()?;
        sessions.insert(session_id.to_string(), state.clone());
        self.write_all(&sessions)?;
        debug!(session = session_id, path = %self.path.display(), "session saved");
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<Value>, StoreError> {
        check_session_id(session_id)?;
        Ok(self.read_all()?.remove(session_id))
    }

    fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        check_session_id(session_id)?;
        let mut sessions = self.read_all()?;
        if sessions.remove(session_id).is_none() {
            return Ok(false);
        }
        self.write_all(&sessions)?;
        debug!(session = session_id, path = %self.path.display(), "session deleted");
        Ok(true)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_all()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions.json"));
        assert_eq!(store.load("s1").unwrap(), None);
        assert!(store.list().unwrap().is_empty());
        assert!(!store.delete("s1").unwrap());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, "{ not json").unwrap();
        let store = FileSessionStore::new(&path);
        assert!(matches!(store.load("s1"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn empty_session_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions.json"));
        assert!(matches!(
            store.save(" ", &json!({})),
            Err(StoreError::EmptySessionId)
        ));
    }
}
