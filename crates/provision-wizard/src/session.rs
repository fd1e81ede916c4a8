use provision_spec::EntryData;
use provision_store::SessionStore;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::info;

use crate::error::WizardError;
use crate::traverser::{AnswerOutcome, QuestionPathTraverser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    Started,
    Resumed { feedback_count: usize },
}

/// Couples a traverser with a [`SessionStore`] so every step is persisted.
#[derive(Debug)]
pub struct WizardSession<S> {
    store: S,
    traverser: QuestionPathTraverser,
}

impl<S: SessionStore> WizardSession<S> {
    /// The traverser's session id is the store key.
    pub fn new(store: S, traverser: QuestionPathTraverser) -> Self {
        Self { store, traverser }
    }

    pub fn traverser(&self) -> &QuestionPathTraverser {
        &self.traverser
    }

    pub fn traverser_mut(&mut self) -> &mut QuestionPathTraverser {
        &mut self.traverser
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, QuestionPathTraverser) {
        (self.store, self.traverser)
    }

    /// Resumes the stored session, or starts a fresh traversal when none is stored.
    pub fn open(&mut self, timestamp: OffsetDateTime) -> Result<SessionStart, WizardError> {
        let session_id = self.traverser.session_id().to_string();
        match self.store.load(&session_id)? {
            Some(blob) => {
                self.traverser.restore(&blob, timestamp)?;
                Ok(SessionStart::Resumed {
                    feedback_count: self.traverser.feedback_history().len(),
                })
            }
            None => {
                self.traverser.start(timestamp)?;
                self.save()?;
                info!(%session_id, "session created");
                Ok(SessionStart::Started)
            }
        }
    }

    pub fn answer(
        &mut self,
        entry_data: EntryData,
        timestamp: OffsetDateTime,
    ) -> Result<AnswerOutcome, WizardError> {
        let outcome = self
            .traverser
            .answer_current_question(entry_data, timestamp)?;
        if matches!(outcome, AnswerOutcome::Accepted { .. }) {
            self.save()?;
        }
        Ok(outcome)
    }

    pub fn push_level(
        &mut self,
        workflow: &str,
        planning_context: Map<String, Value>,
        timestamp: OffsetDateTime,
    ) -> Result<(), WizardError> {
        self.traverser
            .push_level(workflow, planning_context, timestamp)?;
        self.save()
    }

    pub fn pop_level(&mut self, timestamp: OffsetDateTime) -> Result<(), WizardError> {
        self.traverser.pop_level(timestamp)?;
        self.save()
    }

    pub fn save(&self) -> Result<(), WizardError> {
        let blob = self.traverser.serialize()?;
        let value = blob
            .to_value()
            .map_err(|err| WizardError::Schema(err.to_string()))?;
        self.store.save(self.traverser.session_id(), &value)?;
        Ok(())
    }

    /// Executes the deferred operations of a completed traversal and drops the stored session.
    ///
    /// On failure the operations that ran are already compensated and the session stays stored.
    pub fn finish(&mut self, platform_context: &mut Value) -> Result<(), WizardError> {
        if !self.traverser.is_complete() {
            return Err(WizardError::Incomplete);
        }
        self.traverser.execute_deferred(platform_context)?;
        self.traverser.clear_deferred();
        self.store.delete(self.traverser.session_id())?;
        info!(session_id = %self.traverser.session_id(), "session finished");
        Ok(())
    }

    /// Rolls back pending work and drops the stored session.
    pub fn abandon(&mut self, platform_context: &mut Value) -> Result<(), WizardError> {
        let result = self.traverser.abandon(platform_context);
        self.store.delete(self.traverser.session_id())?;
        result
    }
}
