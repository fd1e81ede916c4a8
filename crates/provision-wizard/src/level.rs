use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use provision_spec::Entry;

/// One frame of the traversal: a position inside a named entry list.
///
/// Entries are referenced by workflow name and index; the frame never copies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub workflow: String,
    /// Id of the entry the level is waiting on, `None` once the list is exhausted.
    pub stopped_at_entry: Option<String>,
    pub stopped_at_entry_index: usize,
    pub planning_context: Map<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub entered_at: OffsetDateTime,
}

impl Level {
    pub fn new(
        workflow: impl Into<String>,
        entries: &[Entry],
        planning_context: Map<String, Value>,
        entered_at: OffsetDateTime,
    ) -> Self {
        let mut level = Self {
            workflow: workflow.into(),
            stopped_at_entry: None,
            stopped_at_entry_index: 0,
            planning_context,
            entered_at,
        };
        level.seek(entries, 0);
        level
    }

    pub fn is_exhausted(&self) -> bool {
        self.stopped_at_entry.is_none()
    }

    pub fn advance(&mut self, entries: &[Entry]) {
        self.seek(entries, self.stopped_at_entry_index + 1);
    }

    /// Whether the stored position agrees with the entry list it points into.
    pub fn is_consistent_with(&self, entries: &[Entry]) -> bool {
        match &self.stopped_at_entry {
            Some(id) => entries
                .get(self.stopped_at_entry_index)
                .is_some_and(|entry| &entry.id == id),
            None => self.stopped_at_entry_index == entries.len(),
        }
    }

    fn seek(&mut self, entries: &[Entry], index: usize) {
        let index = index.min(entries.len());
        self.stopped_at_entry_index = index;
        self.stopped_at_entry = entries.get(index).map(|entry| entry.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision_spec::EntryType;

    fn entries() -> Vec<Entry> {
        vec![
            Entry::new("a", EntryType::String, "A"),
            Entry::new("b", EntryType::String, "B"),
        ]
    }

    #[test]
    fn advance_walks_to_exhaustion() {
        let entries = entries();
        let mut level = Level::new("root", &entries, Map::new(), OffsetDateTime::UNIX_EPOCH);
        assert_eq!(level.stopped_at_entry.as_deref(), Some("a"));
        level.advance(&entries);
        assert_eq!(level.stopped_at_entry.as_deref(), Some("b"));
        assert_eq!(level.stopped_at_entry_index, 1);
        level.advance(&entries);
        assert!(level.is_exhausted());
        assert_eq!(level.stopped_at_entry_index, 2);
        assert!(level.is_consistent_with(&entries));
        level.advance(&entries);
        assert_eq!(level.stopped_at_entry_index, 2);
    }

    #[test]
    fn empty_list_starts_exhausted() {
        let level = Level::new("root", &[], Map::new(), OffsetDateTime::UNIX_EPOCH);
        assert!(level.is_exhausted());
        assert!(level.is_consistent_with(&[]));
    }

    #[test]
    fn mismatched_position_is_inconsistent() {
        let entries = entries();
        let mut level = Level::new("root", &entries, Map::new(), OffsetDateTime::UNIX_EPOCH);
        level.stopped_at_entry = Some("b".into());
        assert!(!level.is_consistent_with(&entries));
    }
}
