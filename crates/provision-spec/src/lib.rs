#![allow(missing_docs)]

pub mod automatic;
pub mod entry;
pub mod expr;
pub mod secrets;
pub mod validate;

pub use automatic::{AnswerContext, AutomaticAnswerProvider, ExpressionError, ExpressionEvaluator};
pub use entry::{AnswerValue, Entry, EntryData, EntryType, SpecError, ValidationRules};
pub use expr::Expr;
pub use secrets::{
    MASK, MemorySecretStore, ProcessEnvStore, SecretError, SecretResolver, SecretStore,
};
pub use validate::{
    CrossFieldValidator, RuleError, ValidationResult, Validator, ValidatorFactory,
};
