use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::automatic::AnswerContext;
use crate::entry::AnswerValue;

/// Condition AST evaluated over recorded answers, used by cross-field rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Literal { value: AnswerValue },
    Answer { id: String },
    IsSet { id: String },
    And { expressions: Vec<Expr> },
    Or { expressions: Vec<Expr> },
    Not { expression: Box<Expr> },
    Eq { left: Box<Expr>, right: Box<Expr> },
    Ne { left: Box<Expr>, right: Box<Expr> },
    Lt { left: Box<Expr>, right: Box<Expr> },
    Lte { left: Box<Expr>, right: Box<Expr> },
    Gt { left: Box<Expr>, right: Box<Expr> },
    Gte { left: Box<Expr>, right: Box<Expr> },
}

impl Expr {
    pub fn answer(id: impl Into<String>) -> Self {
        Expr::Answer { id: id.into() }
    }

    pub fn literal(value: impl Into<AnswerValue>) -> Self {
        Expr::Literal {
            value: value.into(),
        }
    }

    /// Evaluates the expression; `None` means an operand is not answered yet.
    pub fn evaluate_value(&self, ctx: &AnswerContext) -> Option<AnswerValue> {
        match self {
            Expr::Literal { value } => Some(value.clone()),
            Expr::Answer { id } => ctx.get(id).cloned(),
            Expr::IsSet { id } => Some(AnswerValue::Boolean(ctx.contains_key(id))),
            Expr::And { expressions } => Self::evaluate_and(expressions, ctx),
            Expr::Or { expressions } => Self::evaluate_or(expressions, ctx),
            Expr::Not { expression } => expression
                .evaluate_bool(ctx)
                .map(|value| AnswerValue::Boolean(!value)),
            Expr::Eq { left, right } => {
                let left_value = left.evaluate_value(ctx)?;
                let right_value = right.evaluate_value(ctx)?;
                Some(AnswerValue::Boolean(left_value == right_value))
            }
            Expr::Ne { left, right } => {
                let left_value = left.evaluate_value(ctx)?;
                let right_value = right.evaluate_value(ctx)?;
                Some(AnswerValue::Boolean(left_value != right_value))
            }
            Expr::Lt { left, right } => {
                Self::evaluate_compare(left, right, ctx, |o| o == Ordering::Less)
            }
            Expr::Lte { left, right } => {
                Self::evaluate_compare(left, right, ctx, |o| o != Ordering::Greater)
            }
            Expr::Gt { left, right } => {
                Self::evaluate_compare(left, right, ctx, |o| o == Ordering::Greater)
            }
            Expr::Gte { left, right } => {
                Self::evaluate_compare(left, right, ctx, |o| o != Ordering::Less)
            }
        }
    }

    /// Evaluates the expression and coerces the result into a boolean when possible.
    pub fn evaluate_bool(&self, ctx: &AnswerContext) -> Option<bool> {
        match self.evaluate_value(ctx)? {
            AnswerValue::Boolean(value) => Some(value),
            AnswerValue::Integer(value) => Some(value != 0),
            AnswerValue::String(text) => match text.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" | "" => Some(false),
                _ => None,
            },
        }
    }

    fn evaluate_and(expressions: &[Expr], ctx: &AnswerContext) -> Option<AnswerValue> {
        let mut seen_none = false;
        for expression in expressions {
            match expression.evaluate_bool(ctx) {
                Some(false) => return Some(AnswerValue::Boolean(false)),
                Some(true) => continue,
                None => seen_none = true,
            }
        }
        if seen_none {
            None
        } else {
            Some(AnswerValue::Boolean(true))
        }
    }

    fn evaluate_or(expressions: &[Expr], ctx: &AnswerContext) -> Option<AnswerValue> {
        let mut seen_none = false;
        for expression in expressions {
            match expression.evaluate_bool(ctx) {
                Some(true) => return Some(AnswerValue::Boolean(true)),
                Some(false) => continue,
                None => seen_none = true,
            }
        }
        if seen_none {
            None
        } else {
            Some(AnswerValue::Boolean(false))
        }
    }

    fn evaluate_compare<F>(
        left: &Expr,
        right: &Expr,
        ctx: &AnswerContext,
        predicate: F,
    ) -> Option<AnswerValue>
    where
        F: Fn(Ordering) -> bool,
    {
        let left_value = left.evaluate_value(ctx)?;
        let right_value = right.evaluate_value(ctx)?;
        let ordering = Self::compare_values(&left_value, &right_value)?;
        Some(AnswerValue::Boolean(predicate(ordering)))
    }

    fn compare_values(left: &AnswerValue, right: &AnswerValue) -> Option<Ordering> {
        match (left, right) {
            (AnswerValue::Integer(left), AnswerValue::Integer(right)) => Some(left.cmp(right)),
            (AnswerValue::String(left), AnswerValue::String(right)) => Some(left.cmp(right)),
            _ if left == right => Some(Ordering::Equal),
            _ => None,
        }
    }
}
