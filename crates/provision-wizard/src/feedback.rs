use provision_spec::{AnswerContext, EntryData, MASK};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A recorded answer. Sensitive feedback carries the `$NAME` reference, never the raw value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub feedback_id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Entry list the answered entry belongs to; ids are only unique per list.
    pub workflow: String,
    pub entry: String,
    pub entry_data: EntryData,
    pub is_automatic: bool,
    pub is_sensitive: bool,
}

impl Feedback {
    /// Value suitable for logs and terminals.
    pub fn display_value(&self) -> String {
        if self.is_sensitive {
            MASK.to_string()
        } else {
            self.entry_data.value.to_string()
        }
    }
}

/// Latest recorded value per entry id. Sensitive entries map to their reference.
pub fn answer_context(history: &[Feedback]) -> AnswerContext {
    history
        .iter()
        .map(|feedback| (feedback.entry.clone(), feedback.entry_data.value.clone()))
        .collect()
}
