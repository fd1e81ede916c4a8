use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use provision_spec::{CrossFieldValidator, Entry, Validator, ValidatorFactory};
use serde::{Deserialize, Serialize};

use crate::deferred::OperationKind;
use crate::error::WizardError;

/// Name of the top-level entry list.
pub const ROOT_WORKFLOW: &str = "root";

/// Workflow definition: the ordered questions plus the nested lists a traversal may enter.
///
/// Its canonical JSON form feeds [`Workflow::version_hash`], so any edit to a
/// definition invalidates sessions saved against the previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Workflow {
    pub entries: Vec<Entry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_workflows: BTreeMap<String, Vec<Entry>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<CrossFieldValidator>,
    /// Deferred operations registered whenever the keyed entry is answered.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub effects: BTreeMap<String, Vec<OperationKind>>,
}

impl Workflow {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    pub fn with_sub_workflow(mut self, name: impl Into<String>, entries: Vec<Entry>) -> Self {
        self.sub_workflows.insert(name.into(), entries);
        self
    }

    pub fn with_validation(mut self, validation: CrossFieldValidator) -> Self {
        self.validations.push(validation);
        self
    }

    pub fn with_effect(mut self, entry_id: impl Into<String>, operation: OperationKind) -> Self {
        self.effects.entry(entry_id.into()).or_default().push(operation);
        self
    }

    /// Loads a definition from a `.toml` file, or JSON for any other extension.
    pub fn load(path: &Path) -> Result<Self, WizardError> {
        let raw = fs::read_to_string(path).map_err(|source| WizardError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |message: String| WizardError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            toml::from_str(&raw).map_err(|err| parse_err(err.to_string()))
        } else {
            serde_json::from_str(&raw).map_err(|err| parse_err(err.to_string()))
        }
    }

    pub fn entries_for(&self, workflow: &str) -> Option<&[Entry]> {
        if workflow == ROOT_WORKFLOW {
            Some(&self.entries)
        } else {
            self.sub_workflows.get(workflow).map(Vec::as_slice)
        }
    }

    pub fn find_entry(&self, entry_id: &str) -> Option<&Entry> {
        self.lists()
            .flat_map(|(_, entries)| entries.iter())
            .find(|entry| entry.id == entry_id)
    }

    pub fn contains_entry(&self, entry_id: &str) -> bool {
        self.find_entry(entry_id).is_some()
    }

    /// blake3 digest of the canonical JSON encoding, hex encoded.
    pub fn version_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_hex().to_string()
    }

    /// Checks the definition and builds one validator per entry, keyed by list name.
    pub fn compile(&self) -> Result<BTreeMap<String, Vec<Validator>>, WizardError> {
        if self.sub_workflows.contains_key(ROOT_WORKFLOW) {
            return Err(WizardError::Definition(format!(
                "sub-workflow name '{ROOT_WORKFLOW}' is reserved"
            )));
        }

        let mut compiled = BTreeMap::new();
        for (name, entries) in self.lists() {
            let mut seen = BTreeSet::new();
            let mut validators = Vec::with_capacity(entries.len());
            for entry in entries {
                entry.check().map_err(|source| WizardError::Entry {
                    workflow: name.to_string(),
                    entry: entry.id.clone(),
                    source,
                })?;
                if !seen.insert(entry.id.as_str()) {
                    return Err(WizardError::Definition(format!(
                        "duplicate entry id '{}' in workflow '{name}'",
                        entry.id
                    )));
                }
                let validator =
                    ValidatorFactory::for_entry(entry).map_err(|source| WizardError::Rule {
                        workflow: name.to_string(),
                        entry: entry.id.clone(),
                        source,
                    })?;
                validators.push(validator);
            }
            compiled.insert(name.to_string(), validators);
        }

        for validation in &self.validations {
            if let Some(field) = validation
                .fields
                .iter()
                .find(|field| !self.contains_entry(field))
            {
                return Err(WizardError::Definition(format!(
                    "validation '{}' references unknown entry '{field}'",
                    validation.id
                )));
            }
        }

        if let Some(entry_id) = self.effects.keys().find(|id| !self.contains_entry(id)) {
            return Err(WizardError::Definition(format!(
                "effects declared for unknown entry '{entry_id}'"
            )));
        }

        Ok(compiled)
    }

    fn lists(&self) -> impl Iterator<Item = (&str, &[Entry])> {
        std::iter::once((ROOT_WORKFLOW, self.entries.as_slice())).chain(
            self.sub_workflows
                .iter()
                .map(|(name, entries)| (name.as_str(), entries.as_slice())),
        )
    }
}
