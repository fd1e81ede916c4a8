use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Supported answer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    String,
    Integer,
    Boolean,
    Choice,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryType::String => "string",
            EntryType::Integer => "integer",
            EntryType::Boolean => "boolean",
            EntryType::Choice => "choice",
        };
        f.write_str(name)
    }
}

/// A single answer value. Choice answers are carried as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub enum AnswerValue {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl AnswerValue {
    pub fn matches(&self, kind: EntryType) -> bool {
        matches!(
            (self, kind),
            (AnswerValue::String(_), EntryType::String | EntryType::Choice)
                | (AnswerValue::Integer(_), EntryType::Integer)
                | (AnswerValue::Boolean(_), EntryType::Boolean)
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AnswerValue::Boolean(_) => "boolean",
            AnswerValue::Integer(_) => "integer",
            AnswerValue::String(_) => "string",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnswerValue::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AnswerValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AnswerValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Converts a JSON scalar into an answer value. Floats, nulls and containers are rejected.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(flag) => Some(AnswerValue::Boolean(*flag)),
            Value::Number(number) => number.as_i64().map(AnswerValue::Integer),
            Value::String(text) => Some(AnswerValue::String(text.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AnswerValue::Boolean(flag) => Value::Bool(*flag),
            AnswerValue::Integer(value) => Value::from(*value),
            AnswerValue::String(text) => Value::String(text.clone()),
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Boolean(flag) => write!(f, "{flag}"),
            AnswerValue::Integer(value) => write!(f, "{value}"),
            AnswerValue::String(text) => f.write_str(text),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::String(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::String(value)
    }
}

impl From<i64> for AnswerValue {
    fn from(value: i64) -> Self {
        AnswerValue::Integer(value)
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Boolean(value)
    }
}

/// Rules enforced on an entry's answer before it is recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

impl ValidationRules {
    pub fn is_empty(&self) -> bool {
        self.pattern.is_none() && self.min.is_none() && self.max.is_none() && self.choices.is_none()
    }
}

/// Definition of a single question inside a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Entry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<AnswerValue>,
    /// `${entry_id}` reference or literal used to answer without prompting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_answer: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var_name: Option<String>,
    #[serde(default, skip_serializing_if = "ValidationRules::is_empty")]
    pub rules: ValidationRules,
}

impl Entry {
    pub fn new(id: impl Into<String>, kind: EntryType, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            prompt: prompt.into(),
            help_text: None,
            default: None,
            automatic_answer: None,
            sensitive: false,
            env_var_name: None,
            rules: ValidationRules::default(),
        }
    }

    pub fn with_help(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = Some(help_text.into());
        self
    }

    pub fn with_default(mut self, value: impl Into<AnswerValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_automatic_answer(mut self, expr: impl Into<String>) -> Self {
        self.automatic_answer = Some(expr.into());
        self
    }

    /// Marks the entry sensitive; answers are exported to `env_var_name` and recorded by reference.
    pub fn sensitive(mut self, env_var_name: impl Into<String>) -> Self {
        self.sensitive = true;
        self.env_var_name = Some(env_var_name.into());
        self
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    /// Structural checks that do not depend on other entries.
    pub fn check(&self) -> Result<(), SpecError> {
        if self.id.trim().is_empty() {
            return Err(SpecError::EmptyId);
        }
        if self.sensitive
            && self
                .env_var_name
                .as_deref()
                .is_none_or(|name| name.trim().is_empty())
        {
            return Err(SpecError::MissingEnvVarName {
                entry: self.id.clone(),
            });
        }
        if self.sensitive && !matches!(self.kind, EntryType::String | EntryType::Choice) {
            return Err(SpecError::SensitiveKind {
                entry: self.id.clone(),
                kind: self.kind,
            });
        }
        if let Some(default) = &self.default
            && !default.matches(self.kind)
        {
            return Err(SpecError::TypeMismatch {
                expected: self.kind,
                found: default.type_name(),
            });
        }
        Ok(())
    }
}

/// A typed answer. The value always matches `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct EntryData {
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub value: AnswerValue,
}

impl EntryData {
    pub fn new(kind: EntryType, value: impl Into<AnswerValue>) -> Result<Self, SpecError> {
        let value = value.into();
        if !value.matches(kind) {
            return Err(SpecError::TypeMismatch {
                expected: kind,
                found: value.type_name(),
            });
        }
        Ok(Self { kind, value })
    }

    pub fn from_json(kind: EntryType, value: &Value) -> Result<Self, SpecError> {
        let parsed = AnswerValue::from_json(value).ok_or_else(|| SpecError::TypeMismatch {
            expected: kind,
            found: json_type_name(value),
        })?;
        Self::new(kind, parsed)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self {
            kind: EntryType::String,
            value: AnswerValue::String(value.into()),
        }
    }

    pub fn integer(value: i64) -> Self {
        Self {
            kind: EntryType::Integer,
            value: AnswerValue::Integer(value),
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            kind: EntryType::Boolean,
            value: AnswerValue::Boolean(value),
        }
    }

    pub fn choice(value: impl Into<String>) -> Self {
        Self {
            kind: EntryType::Choice,
            value: AnswerValue::String(value.into()),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.value.matches(self.kind)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(number) if number.is_i64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Errors raised while building entries and answers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("entry id cannot be empty")]
    EmptyId,
    #[error("sensitive entry '{entry}' must declare env_var_name")]
    MissingEnvVarName { entry: String },
    #[error("sensitive entry '{entry}' must be a string or choice, not {kind}")]
    SensitiveKind { entry: String, kind: EntryType },
    #[error("expected {expected} value, found {found}")]
    TypeMismatch {
        expected: EntryType,
        found: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_data_rejects_mismatched_value() {
        let err = EntryData::new(EntryType::Integer, "thirty").expect_err("mismatch");
        assert_eq!(
            err,
            SpecError::TypeMismatch {
                expected: EntryType::Integer,
                found: "string"
            }
        );
        assert!(EntryData::new(EntryType::Choice, "red").is_ok());
    }

    #[test]
    fn entry_data_from_json_rejects_floats() {
        assert!(EntryData::from_json(EntryType::Integer, &json!(30)).is_ok());
        let err = EntryData::from_json(EntryType::Integer, &json!(1.5)).expect_err("float");
        assert!(matches!(err, SpecError::TypeMismatch { found: "number", .. }));
    }

    #[test]
    fn sensitive_entry_requires_env_var() {
        let mut entry = Entry::new("password", EntryType::String, "Password");
        entry.sensitive = true;
        assert_eq!(
            entry.check(),
            Err(SpecError::MissingEnvVarName {
                entry: "password".into()
            })
        );
        let entry = Entry::new("password", EntryType::String, "Password").sensitive("MY_PASSWORD");
        assert!(entry.check().is_ok());
        let pin = Entry::new("pin", EntryType::Integer, "PIN").sensitive("MY_PIN");
        assert!(matches!(pin.check(), Err(SpecError::SensitiveKind { .. })));
    }

    #[test]
    fn entry_serializes_type_tag() {
        let entry = Entry::new("age", EntryType::Integer, "Age").with_default(30);
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["type"], "integer");
        assert_eq!(value["default"], 30);
        assert!(value.get("rules").is_none());
        let back: Entry = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, entry);
    }
}
