use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::automatic::AnswerContext;
use crate::entry::{AnswerValue, Entry, EntryType, ValidationRules};
use crate::expr::Expr;

/// Outcome of validating one answer (or one cross-field rule).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ValidationResult {
    pub fn ok(field: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: None,
            field: field.into(),
            code: None,
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>, code: &str) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            field: field.into(),
            code: Some(code.to_string()),
        }
    }
}

/// Malformed rule definitions. Ordinary invalid answers never produce these.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("min {min} is greater than max {max}")]
    Range { min: i64, max: i64 },
    #[error("choice entries need a non-empty choice list")]
    NoChoices,
    #[error("rule '{rule}' does not apply to {kind} entries")]
    Inapplicable { rule: &'static str, kind: EntryType },
}

#[derive(Debug, Clone)]
pub struct StringValidator {
    pattern: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct IntegerValidator {
    min: Option<i64>,
    max: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ChoiceValidator {
    choices: Vec<String>,
}

/// Per-type answer validator.
#[derive(Debug, Clone)]
pub enum Validator {
    String(StringValidator),
    Integer(IntegerValidator),
    Boolean,
    Choice(ChoiceValidator),
}

pub struct ValidatorFactory;

impl ValidatorFactory {
    pub fn create(kind: EntryType, rules: &ValidationRules) -> Result<Validator, RuleError> {
        match kind {
            EntryType::String => {
                reject(kind, "min", rules.min.is_some())?;
                reject(kind, "max", rules.max.is_some())?;
                reject(kind, "choices", rules.choices.is_some())?;
                let pattern = rules
                    .pattern
                    .as_deref()
                    .map(|pattern| {
                        Regex::new(pattern).map_err(|source| RuleError::Pattern {
                            pattern: pattern.to_string(),
                            source,
                        })
                    })
                    .transpose()?;
                Ok(Validator::String(StringValidator { pattern }))
            }
            EntryType::Integer => {
                reject(kind, "pattern", rules.pattern.is_some())?;
                reject(kind, "choices", rules.choices.is_some())?;
                if let (Some(min), Some(max)) = (rules.min, rules.max)
                    && min > max
                {
                    return Err(RuleError::Range { min, max });
                }
                Ok(Validator::Integer(IntegerValidator {
                    min: rules.min,
                    max: rules.max,
                }))
            }
            EntryType::Boolean => {
                reject(kind, "pattern", rules.pattern.is_some())?;
                reject(kind, "min", rules.min.is_some())?;
                reject(kind, "max", rules.max.is_some())?;
                reject(kind, "choices", rules.choices.is_some())?;
                Ok(Validator::Boolean)
            }
            EntryType::Choice => {
                reject(kind, "pattern", rules.pattern.is_some())?;
                reject(kind, "min", rules.min.is_some())?;
                reject(kind, "max", rules.max.is_some())?;
                match &rules.choices {
                    Some(choices) if !choices.is_empty() => {
                        Ok(Validator::Choice(ChoiceValidator {
                            choices: choices.clone(),
                        }))
                    }
                    _ => Err(RuleError::NoChoices),
                }
            }
        }
    }

    pub fn for_entry(entry: &Entry) -> Result<Validator, RuleError> {
        Self::create(entry.kind, &entry.rules)
    }
}

fn reject(kind: EntryType, rule: &'static str, present: bool) -> Result<(), RuleError> {
    if present {
        Err(RuleError::Inapplicable { rule, kind })
    } else {
        Ok(())
    }
}

impl Validator {
    pub fn validate(&self, field: &str, value: &AnswerValue) -> ValidationResult {
        match self {
            Validator::String(validator) => {
                let Some(text) = value.as_str() else {
                    return type_mismatch(field, EntryType::String, value);
                };
                if let Some(pattern) = &validator.pattern
                    && !pattern.is_match(text)
                {
                    return ValidationResult::invalid(
                        field,
                        format!("value does not match pattern {}", pattern.as_str()),
                        "pattern_mismatch",
                    );
                }
                ValidationResult::ok(field)
            }
            Validator::Integer(validator) => {
                let Some(number) = value.as_i64() else {
                    return type_mismatch(field, EntryType::Integer, value);
                };
                if let Some(min) = validator.min
                    && number < min
                {
                    return ValidationResult::invalid(
                        field,
                        format!("value must be at least {min}"),
                        "min",
                    );
                }
                if let Some(max) = validator.max
                    && number > max
                {
                    return ValidationResult::invalid(
                        field,
                        format!("value must be at most {max}"),
                        "max",
                    );
                }
                ValidationResult::ok(field)
            }
            Validator::Boolean => {
                if value.as_bool().is_none() {
                    return type_mismatch(field, EntryType::Boolean, value);
                }
                ValidationResult::ok(field)
            }
            Validator::Choice(validator) => {
                let Some(text) = value.as_str() else {
                    return type_mismatch(field, EntryType::Choice, value);
                };
                if !validator.choices.iter().any(|choice| choice == text) {
                    return ValidationResult::invalid(
                        field,
                        format!("value must be one of: {}", validator.choices.join(", ")),
                        "choice_mismatch",
                    );
                }
                ValidationResult::ok(field)
            }
        }
    }
}

fn type_mismatch(field: &str, expected: EntryType, value: &AnswerValue) -> ValidationResult {
    ValidationResult::invalid(
        field,
        format!("expected {expected} value, found {}", value.type_name()),
        "type_mismatch",
    )
}

/// Rule spanning several entries. The rule holds while `require` evaluates to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct CrossFieldValidator {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    pub require: Expr,
    pub message: String,
}

impl CrossFieldValidator {
    pub fn applies_to(&self, entry_id: &str) -> bool {
        self.fields.is_empty() || self.fields.iter().any(|field| field == entry_id)
    }

    /// Undecidable expressions (an operand is not answered yet) are treated as valid.
    pub fn validate(&self, context: &AnswerContext) -> ValidationResult {
        let field = self.fields.first().unwrap_or(&self.id);
        match self.require.evaluate_bool(context) {
            Some(false) => ValidationResult::invalid(field.as_str(), &self.message, "cross_field"),
            _ => ValidationResult::ok(field.as_str()),
        }
    }
}
