use std::collections::BTreeMap;
use std::fmt;

use provision_spec::{
    AnswerContext, AnswerValue, AutomaticAnswerProvider, Entry, EntryData, SecretResolver,
    SpecError, ValidationResult, Validator,
};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::SessionBlob;
use crate::deferred::{DeferredOperation, DeferredOperationsRegistry, OperationKind};
use crate::error::WizardError;
use crate::feedback::{Feedback, answer_context};
use crate::level::Level;
use crate::observer::{CompletionReason, Notification, WizardObserver};
use crate::workflow::{ROOT_WORKFLOW, Workflow};

/// Result of submitting an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The answer was recorded as `feedback_id`, followed by `auto_answered` automatic answers.
    Accepted { feedback_id: u64, auto_answered: usize },
    /// The answer failed validation; nothing changed.
    Rejected(ValidationResult),
}

#[derive(Debug)]
struct TraversalState {
    feedback_history: Vec<Feedback>,
    current_level: Level,
    level_stack: Vec<Level>,
    planning_context: Map<String, Value>,
}

impl TraversalState {
    fn is_complete(&self) -> bool {
        self.current_level.is_exhausted() && self.level_stack.is_empty()
    }
}

/// Walks a workflow one question at a time.
///
/// Control returns to the caller after every `start`, answer and level change;
/// observers hear about each step synchronously, in registration order.
pub struct QuestionPathTraverser {
    workflow: Workflow,
    validators: BTreeMap<String, Vec<Validator>>,
    version_hash: String,
    secrets: SecretResolver,
    session_id: String,
    observers: Vec<Box<dyn WizardObserver>>,
    deferred: DeferredOperationsRegistry,
    state: Option<TraversalState>,
}

impl fmt::Debug for QuestionPathTraverser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuestionPathTraverser")
            .field("session_id", &self.session_id)
            .field("version_hash", &self.version_hash)
            .field("observers", &self.observers.len())
            .field("deferred", &self.deferred.len())
            .field("state", &self.state)
            .finish()
    }
}

impl QuestionPathTraverser {
    pub fn new(workflow: Workflow, secrets: SecretResolver) -> Result<Self, WizardError> {
        let validators = workflow.compile()?;
        let version_hash = workflow.version_hash();
        Ok(Self {
            workflow,
            validators,
            version_hash,
            secrets,
            session_id: Uuid::new_v4().to_string(),
            observers: Vec::new(),
            deferred: DeferredOperationsRegistry::new(),
            state: None,
        })
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn version_hash(&self) -> &str {
        &self.version_hash
    }

    pub fn secrets(&self) -> &SecretResolver {
        &self.secrets
    }

    pub fn register_observer(&mut self, observer: impl WizardObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn is_started(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.state.as_ref().is_some_and(TraversalState::is_complete)
    }

    pub fn feedback_history(&self) -> &[Feedback] {
        self.state
            .as_ref()
            .map(|state| state.feedback_history.as_slice())
            .unwrap_or_default()
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.state.as_ref().map(|state| &state.current_level)
    }

    pub fn level_stack(&self) -> &[Level] {
        self.state
            .as_ref()
            .map(|state| state.level_stack.as_slice())
            .unwrap_or_default()
    }

    /// Session-wide planning context, persisted with the session.
    pub fn planning_context(&self) -> Option<&Map<String, Value>> {
        self.state.as_ref().map(|state| &state.planning_context)
    }

    pub fn planning_context_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.state.as_mut().map(|state| &mut state.planning_context)
    }

    /// Recorded answers keyed by entry id. Sensitive entries map to their `$NAME` reference.
    pub fn answers(&self) -> AnswerContext {
        answer_context(self.feedback_history())
    }

    pub fn deferred(&self) -> &DeferredOperationsRegistry {
        &self.deferred
    }

    pub fn start(&mut self, timestamp: OffsetDateTime) -> Result<(), WizardError> {
        if self.state.is_some() {
            return Err(WizardError::AlreadyStarted);
        }
        let root = Level::new(ROOT_WORKFLOW, &self.workflow.entries, Map::new(), timestamp);
        self.state = Some(TraversalState {
            feedback_history: Vec::new(),
            current_level: root,
            level_stack: Vec::new(),
            planning_context: Map::new(),
        });
        info!(session_id = %self.session_id, "traversal started");

        if self.workflow.entries.is_empty() {
            self.emit(Notification::Completed {
                reason: CompletionReason::EmptyWorkflow,
            });
            return Ok(());
        }
        self.settle(timestamp)?;
        Ok(())
    }

    pub fn get_current_question(&self) -> Option<&Entry> {
        let level = &self.state.as_ref()?.current_level;
        self.workflow
            .entries_for(&level.workflow)?
            .get(level.stopped_at_entry_index)
    }

    /// Validates and records an answer to the current question, then applies every
    /// automatic answer that becomes available.
    ///
    /// Rules run on the raw value first; a sensitive answer is exported only once accepted.
    pub fn answer_current_question(
        &mut self,
        entry_data: EntryData,
        timestamp: OffsetDateTime,
    ) -> Result<AnswerOutcome, WizardError> {
        if self.state.is_none() {
            return Err(WizardError::NotStarted);
        }
        let entry = self
            .get_current_question()
            .cloned()
            .ok_or(WizardError::TraversalComplete)?;

        let verdict = if entry_data.kind == entry.kind {
            self.validate(&entry, &entry_data.value)
        } else {
            ValidationResult::invalid(
                entry.id.as_str(),
                format!("expected {} answer, found {}", entry.kind, entry_data.kind),
                "type_mismatch",
            )
        };
        if !verdict.valid {
            warn!(
                entry = %entry.id,
                code = verdict.code.as_deref().unwrap_or_default(),
                "answer rejected"
            );
            return Ok(AnswerOutcome::Rejected(verdict));
        }

        let feedback_id = self.record(&entry, entry_data, false, timestamp)?;
        let auto_answered = self.settle(timestamp)?;
        Ok(AnswerOutcome::Accepted {
            feedback_id,
            auto_answered,
        })
    }

    /// Suspends the active level and starts walking the named sub-workflow.
    ///
    /// The parent resumes at its saved position once the sub-workflow is exhausted.
    pub fn push_level(
        &mut self,
        workflow: &str,
        planning_context: Map<String, Value>,
        timestamp: OffsetDateTime,
    ) -> Result<(), WizardError> {
        let entries = self
            .workflow
            .entries_for(workflow)
            .ok_or_else(|| WizardError::UnknownWorkflow(workflow.to_string()))?;
        let state = self.state.as_mut().ok_or(WizardError::NotStarted)?;
        if state.is_complete() {
            return Err(WizardError::TraversalComplete);
        }
        let level = Level::new(workflow, entries, planning_context, timestamp);
        let parent = std::mem::replace(&mut state.current_level, level);
        state.level_stack.push(parent);
        info!(
            workflow,
            depth = state.level_stack.len(),
            "entered sub-workflow"
        );
        self.settle(timestamp)?;
        Ok(())
    }

    /// Leaves the active sub-workflow early and resumes its parent.
    pub fn pop_level(&mut self, timestamp: OffsetDateTime) -> Result<(), WizardError> {
        let state = self.state.as_mut().ok_or(WizardError::NotStarted)?;
        let parent = state.level_stack.pop().ok_or(WizardError::NoParentLevel)?;
        let left = std::mem::replace(&mut state.current_level, parent);
        info!(workflow = %left.workflow, "left sub-workflow");
        self.settle(timestamp)?;
        Ok(())
    }

    /// Re-emits every recorded feedback with `is_new = false`.
    pub fn replay_history(&mut self) {
        let history = self.feedback_history().to_vec();
        for feedback in history {
            self.emit(Notification::FeedbackEntered {
                feedback,
                is_new: false,
            });
        }
    }

    /// Registers an operation against the most recent feedback.
    pub fn register_operation(&mut self, operation: OperationKind) -> Result<u64, WizardError> {
        let feedback_id = self
            .feedback_history()
            .last()
            .map(|feedback| feedback.feedback_id)
            .ok_or(WizardError::NoFeedback)?;
        self.deferred
            .register(DeferredOperation::new(feedback_id, operation));
        Ok(feedback_id)
    }

    /// Executes pending deferred operations against `platform_context`.
    pub fn execute_deferred(&mut self, platform_context: &mut Value) -> Result<(), WizardError> {
        let history = self
            .state
            .as_ref()
            .map(|state| state.feedback_history.as_slice())
            .unwrap_or_default();
        self.deferred
            .execute_all(history, platform_context, &self.secrets)?;
        Ok(())
    }

    pub fn clear_deferred(&mut self) {
        self.deferred.clear();
    }

    /// Rolls back every deferred operation and reports the traversal as abandoned.
    pub fn abandon(&mut self, platform_context: &mut Value) -> Result<(), WizardError> {
        let result = self.deferred.rollback_all(platform_context);
        self.deferred.clear();
        info!(session_id = %self.session_id, "traversal abandoned");
        self.emit(Notification::Completed {
            reason: CompletionReason::Abandoned,
        });
        result.map_err(WizardError::from)
    }

    pub fn serialize(&self) -> Result<SessionBlob, WizardError> {
        let state = self.state.as_ref().ok_or(WizardError::NotStarted)?;
        Ok(SessionBlob {
            workflow_version_hash: self.version_hash.clone(),
            current_entry_index: state.current_level.stopped_at_entry_index,
            current_feedback_id: state.feedback_history.len() as u64,
            feedback_history: state.feedback_history.clone(),
            current_level: state.current_level.clone(),
            level_stack: state.level_stack.clone(),
            planning_context: state.planning_context.clone(),
            deferred_operations: self.deferred.serialize(),
        })
    }

    /// Replaces the traversal state with a persisted session.
    ///
    /// The workflow version is checked before anything else is parsed. Only
    /// `session_restored` is emitted; the position is taken from the blob as is.
    pub fn restore(&mut self, blob: &Value, timestamp: OffsetDateTime) -> Result<(), WizardError> {
        let found = blob
            .get("workflow_version_hash")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                WizardError::Schema("missing or non-string workflow_version_hash".to_string())
            })?;
        if found != self.version_hash {
            return Err(WizardError::VersionMismatch {
                expected: self.version_hash.clone(),
                found: found.to_string(),
            });
        }
        let parsed =
            SessionBlob::from_value(blob).map_err(|err| WizardError::Schema(err.to_string()))?;
        parsed.check(&self.workflow).map_err(WizardError::Schema)?;

        let feedback_count = parsed.feedback_history.len();
        self.deferred = DeferredOperationsRegistry::from_serialized(parsed.deferred_operations);
        self.state = Some(TraversalState {
            feedback_history: parsed.feedback_history,
            current_level: parsed.current_level,
            level_stack: parsed.level_stack,
            planning_context: parsed.planning_context,
        });
        info!(
            session_id = %self.session_id,
            feedback_count,
            restored_at = %timestamp,
            "session restored"
        );
        self.emit(Notification::SessionRestored {
            session_id: self.session_id.clone(),
            feedback_count,
        });
        Ok(())
    }

    fn emit(&mut self, notification: Notification) {
        for observer in &mut self.observers {
            observer.notify(&notification);
        }
    }

    fn validate(&self, entry: &Entry, value: &AnswerValue) -> ValidationResult {
        let validator = self.state.as_ref().and_then(|state| {
            let level = &state.current_level;
            self.validators
                .get(&level.workflow)?
                .get(level.stopped_at_entry_index)
        });
        if let Some(validator) = validator {
            let result = validator.validate(&entry.id, value);
            if !result.valid {
                return result;
            }
        }

        let mut context = self.answers();
        context.insert(entry.id.clone(), value.clone());
        self.workflow
            .validations
            .iter()
            .filter(|rule| rule.applies_to(&entry.id))
            .map(|rule| rule.validate(&context))
            .find(|result| !result.valid)
            .unwrap_or_else(|| ValidationResult::ok(entry.id.as_str()))
    }

    /// Appends feedback for the current question and advances past it.
    fn record(
        &mut self,
        entry: &Entry,
        entry_data: EntryData,
        is_automatic: bool,
        timestamp: OffsetDateTime,
    ) -> Result<u64, WizardError> {
        let entry_data = if entry.sensitive {
            let name = entry
                .env_var_name
                .as_deref()
                .ok_or_else(|| WizardError::Entry {
                    workflow: self
                        .current_level()
                        .map(|level| level.workflow.clone())
                        .unwrap_or_default(),
                    entry: entry.id.clone(),
                    source: SpecError::MissingEnvVarName {
                        entry: entry.id.clone(),
                    },
                })?;
            let reference = self.secrets.export(name, &entry_data.value.to_string())?;
            EntryData {
                kind: entry.kind,
                value: AnswerValue::String(reference),
            }
        } else {
            entry_data
        };

        let state = self.state.as_mut().ok_or(WizardError::NotStarted)?;
        let feedback = Feedback {
            feedback_id: state.feedback_history.len() as u64,
            timestamp,
            workflow: state.current_level.workflow.clone(),
            entry: entry.id.clone(),
            entry_data,
            is_automatic,
            is_sensitive: entry.sensitive,
        };
        let feedback_id = feedback.feedback_id;
        state.feedback_history.push(feedback.clone());
        let entries = self
            .workflow
            .entries_for(&state.current_level.workflow)
            .unwrap_or_default();
        state.current_level.advance(entries);

        for operation in self.workflow.effects.get(&entry.id).into_iter().flatten() {
            self.deferred
                .register(DeferredOperation::new(feedback_id, operation.clone()));
        }
        debug!(
            feedback_id,
            entry = %entry.id,
            automatic = is_automatic,
            "feedback recorded"
        );
        self.emit(Notification::FeedbackEntered {
            feedback,
            is_new: true,
        });
        Ok(feedback_id)
    }

    /// Applies automatic answers and pops exhausted sub-levels until a question needs
    /// a human or the root list is done. Returns the number of automatic answers.
    fn settle(&mut self, timestamp: OffsetDateTime) -> Result<usize, WizardError> {
        let mut auto_answered = 0;
        loop {
            let state = self.state.as_mut().ok_or(WizardError::NotStarted)?;
            if state.current_level.is_exhausted() {
                match state.level_stack.pop() {
                    Some(parent) => {
                        let finished = std::mem::replace(&mut state.current_level, parent);
                        debug!(workflow = %finished.workflow, "sub-workflow exhausted");
                        continue;
                    }
                    None => {
                        info!(session_id = %self.session_id, "traversal finished");
                        self.emit(Notification::Completed {
                            reason: CompletionReason::Finished,
                        });
                        return Ok(auto_answered);
                    }
                }
            }

            let entry = self
                .get_current_question()
                .cloned()
                .ok_or_else(|| WizardError::Schema("active level points past its entries".into()))?;
            match self.automatic_answer(&entry) {
                Some(entry_data) => {
                    self.record(&entry, entry_data, true, timestamp)?;
                    auto_answered += 1;
                }
                None => {
                    debug!(entry = %entry.id, "waiting for answer");
                    self.emit(Notification::NextQuestionReady { question: entry });
                    return Ok(auto_answered);
                }
            }
        }
    }

    /// Automatic answer for `entry`, if one can be derived and passes validation.
    ///
    /// Sensitive entries resolve a derived `$NAME` reference to its raw value first.
    fn automatic_answer(&self, entry: &Entry) -> Option<EntryData> {
        let answers = self.answers();
        let mut entry_data = AutomaticAnswerProvider::new(&answers).get_automatic_answer(entry)?;
        if entry.sensitive
            && let AnswerValue::String(reference) = &entry_data.value
        {
            match self.secrets.resolve_secret(reference, &entry.id) {
                Ok(raw) => entry_data.value = AnswerValue::String(raw),
                Err(err) => {
                    warn!(entry = %entry.id, error = %err, "automatic answer unavailable");
                    return None;
                }
            }
        }
        let verdict = self.validate(entry, &entry_data.value);
        if !verdict.valid {
            debug!(
                entry = %entry.id,
                code = verdict.code.as_deref().unwrap_or_default(),
                "automatic answer failed validation"
            );
            return None;
        }
        Some(entry_data)
    }
}
