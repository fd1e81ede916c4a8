use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use thiserror::Error;

/// Redaction token shown instead of any sensitive value, whatever its length.
pub const MASK: &str = "********";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret '{name}' referenced by '{field}' is not set")]
    NotFound { name: String, field: String },
    #[error("cannot store secret under '{name}': {reason}")]
    Environment { name: String, reason: &'static str },
}

/// Key-value channel holding the raw values behind `$NAME` references.
pub trait SecretStore: fmt::Debug + Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str) -> Result<(), SecretError>;
}

/// Secret channel backed by the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvStore;

impl SecretStore for ProcessEnvStore {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), SecretError> {
        check_name(name)?;
        if value.contains('\0') {
            return Err(SecretError::Environment {
                name: name.to_string(),
                reason: "value contains a NUL byte",
            });
        }
        // SAFETY: name and value were checked above so `set_var` cannot panic. Callers
        // must not read or write the environment from other threads while this runs;
        // multi-threaded hosts use `MemorySecretStore` instead.
        unsafe { std::env::set_var(name, value) };
        Ok(())
    }
}

/// In-process secret channel, used to keep traversal free of global state.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), SecretError> {
        check_name(name)?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

fn check_name(name: &str) -> Result<(), SecretError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains('=') {
        "name contains '='"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(SecretError::Environment {
        name: name.to_string(),
        reason,
    })
}

/// Resolves, creates and masks `$NAME` references to sensitive values.
#[derive(Debug, Clone)]
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
}

impl Default for SecretResolver {
    fn default() -> Self {
        Self::process_env()
    }
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub fn process_env() -> Self {
        Self::new(Arc::new(ProcessEnvStore))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySecretStore::new()))
    }

    pub fn is_secret_reference(value: &str) -> bool {
        value.len() > 1 && value.starts_with('$')
    }

    pub fn create_secret_reference(name: &str) -> String {
        format!("${name}")
    }

    pub fn mask_sensitive_value(_value: &str) -> &'static str {
        MASK
    }

    /// Returns the raw value behind `reference`, or `reference` itself when it is a literal.
    pub fn resolve_secret(&self, reference: &str, field: &str) -> Result<String, SecretError> {
        if !Self::is_secret_reference(reference) {
            return Ok(reference.to_string());
        }
        let name = &reference[1..];
        self.store.get(name).ok_or_else(|| SecretError::NotFound {
            name: name.to_string(),
            field: field.to_string(),
        })
    }

    /// Stores `value` under `name` and returns the reference that stands in for it.
    pub fn export(&self, name: &str, value: &str) -> Result<String, SecretError> {
        self.store.set(name, value)?;
        Ok(Self::create_secret_reference(name))
    }

    /// Resolves every reference leaf of a nested JSON structure.
    ///
    /// Errors carry the JSON pointer of the offending leaf as the field.
    pub fn resolve_context_secrets(&self, context: &Value) -> Result<Value, SecretError> {
        self.resolve_at(context, "")
    }

    fn resolve_at(&self, value: &Value, pointer: &str) -> Result<Value, SecretError> {
        match value {
            Value::String(text) if Self::is_secret_reference(text) => {
                let field = if pointer.is_empty() { "/" } else { pointer };
                self.resolve_secret(text, field).map(Value::String)
            }
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, item) in map {
                    let child = format!("{pointer}/{}", escape_segment(key));
                    resolved.insert(key.clone(), self.resolve_at(item, &child)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| self.resolve_at(item, &format!("{pointer}/{idx}")))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }
}

fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> SecretResolver {
        SecretResolver::new(Arc::new(MemorySecretStore::with_values([
            ("DB_PASSWORD", "hunter2"),
            ("API_TOKEN", "tok"),
        ])))
    }

    #[test]
    fn reference_detection() {
        assert!(SecretResolver::is_secret_reference("$X"));
        assert!(!SecretResolver::is_secret_reference(""));
        assert!(!SecretResolver::is_secret_reference("$"));
        assert!(!SecretResolver::is_secret_reference("plain"));
    }

    #[test]
    fn mask_hides_length() {
        assert_eq!(SecretResolver::mask_sensitive_value("a"), MASK);
        assert_eq!(SecretResolver::mask_sensitive_value(&"x".repeat(64)), MASK);
    }

    #[test]
    fn resolve_missing_secret_reports_field() {
        let err = resolver()
            .resolve_secret("$MISSING", "admin_password")
            .expect_err("missing");
        assert_eq!(
            err,
            SecretError::NotFound {
                name: "MISSING".into(),
                field: "admin_password".into()
            }
        );
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn resolve_context_walks_nested_values() {
        let context = json!({
            "db": { "password": "$DB_PASSWORD", "port": 5432 },
            "tokens": ["$API_TOKEN", "literal"],
            "note": "$"
        });
        let resolved = resolver().resolve_context_secrets(&context).expect("resolve");
        assert_eq!(resolved["db"]["password"], "hunter2");
        assert_eq!(resolved["db"]["port"], 5432);
        assert_eq!(resolved["tokens"], json!(["tok", "literal"]));
        assert_eq!(resolved["note"], "$");
    }

    #[test]
    fn resolve_context_error_uses_pointer() {
        let err = resolver()
            .resolve_context_secrets(&json!({ "a": [{ "b": "$NOPE" }] }))
            .expect_err("missing");
        assert_eq!(
            err,
            SecretError::NotFound {
                name: "NOPE".into(),
                field: "/a/0/b".into()
            }
        );
    }

    #[test]
    fn export_rejects_invalid_names() {
        let err = SecretResolver::in_memory()
            .export("BAD=NAME", "value")
            .expect_err("invalid");
        assert!(matches!(err, SecretError::Environment { .. }));
    }
}
