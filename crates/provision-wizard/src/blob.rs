use provision_spec::SecretResolver;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::deferred::DeferredOperation;
use crate::feedback::Feedback;
use crate::level::Level;
use crate::workflow::{ROOT_WORKFLOW, Workflow};

/// Persisted traversal state. Every field is required when parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBlob {
    pub workflow_version_hash: String,
    pub current_entry_index: usize,
    /// Id the next feedback will receive; equals the number of recorded feedbacks.
    pub current_feedback_id: u64,
    pub feedback_history: Vec<Feedback>,
    pub current_level: Level,
    pub level_stack: Vec<Level>,
    pub planning_context: Map<String, Value>,
    pub deferred_operations: Vec<DeferredOperation>,
}

impl SessionBlob {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Parses a blob without looking at the workflow hash.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// Internal consistency against the workflow the blob claims to belong to.
    pub fn check(&self, workflow: &Workflow) -> Result<(), String> {
        for (expected, feedback) in (0u64..).zip(&self.feedback_history) {
            if feedback.feedback_id != expected {
                return Err(format!(
                    "feedback ids must be gapless from 0; found {} at position {expected}",
                    feedback.feedback_id
                ));
            }
            if !feedback.entry_data.is_consistent() {
                return Err(format!(
                    "feedback {expected} holds a {} value for a {} entry",
                    feedback.entry_data.value.type_name(),
                    feedback.entry_data.kind
                ));
            }
            let entry = workflow
                .entries_for(&feedback.workflow)
                .and_then(|entries| entries.iter().find(|entry| entry.id == feedback.entry))
                .ok_or_else(|| {
                    format!(
                        "feedback {expected} answers unknown entry '{}' in '{}'",
                        feedback.entry, feedback.workflow
                    )
                })?;
            if entry.kind != feedback.entry_data.kind {
                return Err(format!(
                    "feedback {expected} is typed {} but entry '{}' is {}",
                    feedback.entry_data.kind, entry.id, entry.kind
                ));
            }
            if entry.sensitive {
                let is_reference = feedback
                    .entry_data
                    .value
                    .as_str()
                    .is_some_and(SecretResolver::is_secret_reference);
                if !feedback.is_sensitive || !is_reference {
                    return Err(format!(
                        "feedback {expected} for sensitive entry '{}' must hold a secret reference",
                        entry.id
                    ));
                }
            }
        }

        let recorded = self.feedback_history.len() as u64;
        if self.current_feedback_id != recorded {
            return Err(format!(
                "current_feedback_id is {} but {recorded} feedbacks are recorded",
                self.current_feedback_id
            ));
        }

        let bottom = self.level_stack.first().unwrap_or(&self.current_level);
        if bottom.workflow != ROOT_WORKFLOW {
            return Err(format!(
                "bottom level must walk '{ROOT_WORKFLOW}', found '{}'",
                bottom.workflow
            ));
        }
        for level in self.level_stack.iter().chain(std::iter::once(&self.current_level)) {
            let entries = workflow
                .entries_for(&level.workflow)
                .ok_or_else(|| format!("level references unknown workflow '{}'", level.workflow))?;
            if !level.is_consistent_with(entries) {
                return Err(format!(
                    "level in '{}' stopped at index {} which does not match {:?}",
                    level.workflow, level.stopped_at_entry_index, level.stopped_at_entry
                ));
            }
        }
        if !self.level_stack.is_empty() && self.current_level.is_exhausted() {
            return Err(format!(
                "sub-workflow level '{}' is exhausted but was not popped",
                self.current_level.workflow
            ));
        }
        if self.current_entry_index != self.current_level.stopped_at_entry_index {
            return Err(format!(
                "current_entry_index {} does not match the active level index {}",
                self.current_entry_index, self.current_level.stopped_at_entry_index
            ));
        }

        if let Some(operation) = self
            .deferred_operations
            .iter()
            .find(|operation| operation.feedback_id >= recorded)
        {
            return Err(format!(
                "deferred operation references unrecorded feedback {}",
                operation.feedback_id
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision_spec::{Entry, EntryData, EntryType};
    use time::OffsetDateTime;

    fn workflow() -> Workflow {
        Workflow::new(vec![
            Entry::new("name", EntryType::String, "Name"),
            Entry::new("password", EntryType::String, "Password").sensitive("MY_PASSWORD"),
        ])
    }

    fn feedback(id: u64, entry: &str, data: EntryData, sensitive: bool) -> Feedback {
        Feedback {
            feedback_id: id,
            timestamp: OffsetDateTime::UNIX_EPOCH,
            workflow: ROOT_WORKFLOW.into(),
            entry: entry.into(),
            entry_data: data,
            is_automatic: false,
            is_sensitive: sensitive,
        }
    }

    fn blob(history: Vec<Feedback>) -> SessionBlob {
        let workflow = workflow();
        let mut level = Level::new(
            ROOT_WORKFLOW,
            &workflow.entries,
            Map::new(),
            OffsetDateTime::UNIX_EPOCH,
        );
        for _ in &history {
            level.advance(&workflow.entries);
        }
        SessionBlob {
            workflow_version_hash: workflow.version_hash(),
            current_entry_index: level.stopped_at_entry_index,
            current_feedback_id: history.len() as u64,
            feedback_history: history,
            current_level: level,
            level_stack: Vec::new(),
            planning_context: Map::new(),
            deferred_operations: Vec::new(),
        }
    }

    #[test]
    fn consistent_blob_passes() {
        let blob = blob(vec![
            feedback(0, "name", EntryData::string("Alice"), false),
            feedback(1, "password", EntryData::string("$MY_PASSWORD"), true),
        ]);
        assert_eq!(blob.check(&workflow()), Ok(()));
    }

    #[test]
    fn raw_sensitive_value_is_rejected() {
        let blob = blob(vec![
            feedback(0, "name", EntryData::string("Alice"), false),
            feedback(1, "password", EntryData::string("hunter2"), true),
        ]);
        let err = blob.check(&workflow()).expect_err("raw secret");
        assert!(err.contains("secret reference"));
        assert!(!err.contains("hunter2"));
    }

    #[test]
    fn gap_in_feedback_ids_is_rejected() {
        let mut blob = blob(vec![feedback(0, "name", EntryData::string("Alice"), false)]);
        blob.feedback_history[0].feedback_id = 1;
        assert!(blob.check(&workflow()).is_err());
    }

    #[test]
    fn level_without_planning_context_fails_to_parse() {
        let mut value = blob(Vec::new()).to_value().expect("serialize");
        value["current_level"]
            .as_object_mut()
            .expect("level object")
            .remove("planning_context");
        assert!(SessionBlob::from_value(&value).is_err());
    }

    #[test]
    fn exhausted_sub_level_is_rejected() {
        let workflow = workflow().with_sub_workflow("extra", Vec::new());
        let mut blob = blob(Vec::new());
        blob.workflow_version_hash = workflow.version_hash();
        let root = std::mem::replace(
            &mut blob.current_level,
            Level::new("extra", &[], Map::new(), OffsetDateTime::UNIX_EPOCH),
        );
        blob.level_stack.push(root);
        blob.current_entry_index = 0;
        let err = blob.check(&workflow).expect_err("exhausted sub-level");
        assert!(err.contains("not popped"));
    }

    #[test]
    fn missing_field_fails_to_parse() {
        let mut value = blob(Vec::new()).to_value().expect("serialize");
        value
            .as_object_mut()
            .expect("object")
            .remove("level_stack");
        assert!(SessionBlob::from_value(&value).is_err());
    }
}
