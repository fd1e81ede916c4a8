use std::path::PathBuf;

use provision_spec::{RuleError, SecretError, SpecError};
use provision_store::StoreError;
use thiserror::Error;

use crate::deferred::OperationError;

/// Errors surfaced by traversal, restoration and session handling.
///
/// Invalid answers are not errors; they come back as [`crate::AnswerOutcome::Rejected`].
#[derive(Debug, Error)]
pub enum WizardError {
    #[error("invalid workflow definition: {0}")]
    Definition(String),
    #[error("entry '{entry}' in workflow '{workflow}' is invalid: {source}")]
    Entry {
        workflow: String,
        entry: String,
        #[source]
        source: SpecError,
    },
    #[error("entry '{entry}' in workflow '{workflow}' has invalid rules: {source}")]
    Rule {
        workflow: String,
        entry: String,
        #[source]
        source: RuleError,
    },
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),
    #[error("traversal has not been started")]
    NotStarted,
    #[error("traversal has already been started")]
    AlreadyStarted,
    #[error("traversal is complete; there is no current question")]
    TraversalComplete,
    #[error("traversal is not complete yet")]
    Incomplete,
    #[error("no parent level to return to")]
    NoParentLevel,
    #[error("no feedback recorded yet to attach the operation to")]
    NoFeedback,
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(
        "session belongs to workflow version {found}, current workflow version is {expected}"
    )]
    VersionMismatch { expected: String, found: String },
    #[error("session state is invalid: {0}")]
    Schema(String),
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read workflow {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse workflow {path}: {message}")]
    Parse { path: PathBuf, message: String },
}
