use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::entry::{AnswerValue, Entry, EntryData, EntryType};

/// Recorded answers keyed by entry id.
pub type AnswerContext = BTreeMap<String, AnswerValue>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("expression references unknown answer '{0}'")]
    UnknownReference(String),
    #[error("cannot coerce '{value}' to {target}")]
    Coercion { value: String, target: EntryType },
}

/// Evaluates automatic-answer expressions against prior answers.
///
/// `${name}` resolves to the answer recorded for `name`; any other text is a literal.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionEvaluator<'a> {
    context: &'a AnswerContext,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(context: &'a AnswerContext) -> Self {
        Self { context }
    }

    pub fn evaluate(&self, expr: &str) -> Result<AnswerValue, ExpressionError> {
        match reference_name(expr) {
            Some(name) => self
                .context
                .get(name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnknownReference(name.to_string())),
            None => Ok(AnswerValue::String(expr.to_string())),
        }
    }
}

fn reference_name(expr: &str) -> Option<&str> {
    let name = expr.strip_prefix("${")?.strip_suffix('}')?;
    if name.is_empty() { None } else { Some(name) }
}

/// Decides whether an entry can be answered without prompting.
#[derive(Debug, Clone, Copy)]
pub struct AutomaticAnswerProvider<'a> {
    evaluator: ExpressionEvaluator<'a>,
}

impl<'a> AutomaticAnswerProvider<'a> {
    pub fn new(context: &'a AnswerContext) -> Self {
        Self {
            evaluator: ExpressionEvaluator::new(context),
        }
    }

    /// Returns the derived answer, or `None` when the entry must be asked.
    ///
    /// Evaluation and coercion failures are not errors: the entry simply falls back
    /// to a manual prompt.
    pub fn get_automatic_answer(&self, entry: &Entry) -> Option<EntryData> {
        let expr = entry.automatic_answer.as_deref()?;
        match self
            .evaluator
            .evaluate(expr)
            .and_then(|value| coerce(value, entry.kind))
        {
            Ok(value) => Some(EntryData {
                kind: entry.kind,
                value,
            }),
            Err(err) => {
                debug!(entry = %entry.id, error = %err, "automatic answer unavailable");
                None
            }
        }
    }
}

/// Coerces an evaluated value into the answer type of an entry.
pub fn coerce(value: AnswerValue, target: EntryType) -> Result<AnswerValue, ExpressionError> {
    match target {
        EntryType::String | EntryType::Choice => Ok(match value {
            AnswerValue::String(text) => AnswerValue::String(text),
            other => AnswerValue::String(other.to_string()),
        }),
        EntryType::Integer => match value {
            AnswerValue::Integer(number) => Ok(AnswerValue::Integer(number)),
            AnswerValue::Boolean(flag) => Ok(AnswerValue::Integer(i64::from(flag))),
            AnswerValue::String(text) => text
                .trim()
                .parse::<i64>()
                .map(AnswerValue::Integer)
                .map_err(|_| ExpressionError::Coercion {
                    value: text,
                    target,
                }),
        },
        EntryType::Boolean => Ok(AnswerValue::Boolean(match value {
            AnswerValue::Boolean(flag) => flag,
            AnswerValue::String(text) => {
                matches!(text.to_lowercase().as_str(), "true" | "yes" | "1")
            }
            AnswerValue::Integer(number) => number != 0,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AnswerContext {
        AnswerContext::from([
            ("name".to_string(), AnswerValue::from("John")),
            ("replicas".to_string(), AnswerValue::from("3")),
            ("enabled".to_string(), AnswerValue::from(true)),
        ])
    }

    #[test]
    fn evaluate_resolves_reference() {
        let ctx = context();
        let evaluator = ExpressionEvaluator::new(&ctx);
        assert_eq!(evaluator.evaluate("${name}"), Ok(AnswerValue::from("John")));
    }

    #[test]
    fn evaluate_missing_reference_is_error() {
        let ctx = context();
        let evaluator = ExpressionEvaluator::new(&ctx);
        assert_eq!(
            evaluator.evaluate("${region}"),
            Err(ExpressionError::UnknownReference("region".into()))
        );
    }

    #[test]
    fn evaluate_returns_literals_verbatim() {
        let ctx = context();
        let evaluator = ExpressionEvaluator::new(&ctx);
        assert_eq!(evaluator.evaluate("us-east-1"), Ok(AnswerValue::from("us-east-1")));
        assert_eq!(evaluator.evaluate("${}"), Ok(AnswerValue::from("${}")));
        assert_eq!(evaluator.evaluate("$name"), Ok(AnswerValue::from("$name")));
    }

    #[test]
    fn coerce_integer_from_string() {
        assert_eq!(
            coerce(AnswerValue::from("3"), EntryType::Integer),
            Ok(AnswerValue::Integer(3))
        );
        assert!(matches!(
            coerce(AnswerValue::from("three"), EntryType::Integer),
            Err(ExpressionError::Coercion { .. })
        ));
    }

    #[test]
    fn coerce_boolean_accepts_truthy_strings() {
        for text in ["true", "YES", "1"] {
            assert_eq!(
                coerce(AnswerValue::from(text), EntryType::Boolean),
                Ok(AnswerValue::Boolean(true))
            );
        }
        assert_eq!(
            coerce(AnswerValue::from("nope"), EntryType::Boolean),
            Ok(AnswerValue::Boolean(false))
        );
        assert_eq!(
            coerce(AnswerValue::Integer(2), EntryType::Boolean),
            Ok(AnswerValue::Boolean(true))
        );
    }

    #[test]
    fn provider_falls_back_on_coercion_failure() {
        let ctx = AnswerContext::from([("name".to_string(), AnswerValue::from("John"))]);
        let provider = AutomaticAnswerProvider::new(&ctx);
        let entry = Entry::new("count", EntryType::Integer, "Count").with_automatic_answer("${name}");
        assert_eq!(provider.get_automatic_answer(&entry), None);
    }

    #[test]
    fn provider_coerces_to_entry_type() {
        let ctx = context();
        let provider = AutomaticAnswerProvider::new(&ctx);
        let entry =
            Entry::new("count", EntryType::Integer, "Count").with_automatic_answer("${replicas}");
        assert_eq!(provider.get_automatic_answer(&entry), Some(EntryData::integer(3)));
        let plain = Entry::new("plain", EntryType::String, "Plain");
        assert_eq!(provider.get_automatic_answer(&plain), None);
    }
}
