#![allow(missing_docs)]

pub mod blob;
pub mod deferred;
pub mod error;
pub mod feedback;
pub mod level;
pub mod observer;
pub mod session;
pub mod traverser;
pub mod workflow;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
pub mod cmd;
#[cfg(feature = "cli")]
pub mod config;

pub use blob::SessionBlob;
pub use deferred::{
    DeferredOperation, DeferredOperationsRegistry, OperationError, OperationKind, OperationState,
};
pub use error::WizardError;
pub use feedback::Feedback;
pub use level::Level;
pub use observer::{CompletionReason, Notification, TracingObserver, WizardObserver};
pub use session::{SessionStart, WizardSession};
pub use traverser::{AnswerOutcome, QuestionPathTraverser};
pub use workflow::{ROOT_WORKFLOW, Workflow};
