//! Side effects collected during traversal and applied only once it completes.
//!
//! Operations run strictly in registration order. When one fails, every operation
//! that already ran is compensated in reverse order before the failure is reported.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use provision_spec::{
    AnswerContext, AnswerValue, ExpressionError, ExpressionEvaluator, SecretError, SecretResolver,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::feedback::{Feedback, answer_context};

/// Closed set of operations a workflow can defer.
///
/// String fields may hold `${entry_id}` references to recorded answers and
/// `$SECRET` references, both resolved right before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    /// Writes `value` at a JSON pointer of the platform context. Segments address object members.
    SetContext { pointer: String, value: Value },
    /// Writes `contents` to `path`. The parent directory must exist.
    WriteFile { path: String, contents: String },
    CreateDir { path: String },
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::SetContext { .. } => "set_context",
            OperationKind::WriteFile { .. } => "write_file",
            OperationKind::CreateDir { .. } => "create_dir",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Pending,
    Executed,
    RolledBack,
    Failed,
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("operation for feedback {feedback_id}: {source}")]
    Expression {
        feedback_id: u64,
        #[source]
        source: ExpressionError,
    },
    #[error("operation for feedback {feedback_id}: {source}")]
    Secret {
        feedback_id: u64,
        #[source]
        source: SecretError,
    },
    #[error("operation for feedback {feedback_id} failed on {path}: {source}")]
    Io {
        feedback_id: u64,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("operation for feedback {feedback_id} cannot use pointer '{pointer}': {message}")]
    Pointer {
        feedback_id: u64,
        pointer: String,
        message: String,
    },
}

/// What is needed to undo an executed operation.
#[derive(Debug, Clone)]
enum Undo {
    Context {
        segments: Vec<String>,
        created_at: Option<usize>,
        previous: Option<Value>,
    },
    File {
        path: PathBuf,
        previous: Option<Vec<u8>>,
    },
    /// Directories created by the operation, deepest first.
    Dirs(Vec<PathBuf>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredOperation {
    pub feedback_id: u64,
    pub operation: OperationKind,
    #[serde(skip)]
    state: OperationState,
    #[serde(skip)]
    undo: Option<Undo>,
}

impl DeferredOperation {
    pub fn new(feedback_id: u64, operation: OperationKind) -> Self {
        Self {
            feedback_id,
            operation,
            state: OperationState::Pending,
            undo: None,
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn execute(
        &mut self,
        feedback_history: &[Feedback],
        platform_context: &mut Value,
        secrets: &SecretResolver,
    ) -> Result<(), OperationError> {
        let answers = answer_context(feedback_history);
        match self.apply(&answers, platform_context, secrets) {
            Ok(undo) => {
                self.undo = Some(undo);
                self.state = OperationState::Executed;
                info!(
                    feedback_id = self.feedback_id,
                    operation = self.operation.name(),
                    "deferred operation executed"
                );
                Ok(())
            }
            Err(err) => {
                self.state = OperationState::Failed;
                Err(err)
            }
        }
    }

    /// Undoes an executed operation. Operations that never ran are simply marked rolled back.
    pub fn rollback(&mut self, platform_context: &mut Value) -> Result<(), OperationError> {
        if self.state == OperationState::Executed
            && let Some(undo) = self.undo.take()
        {
            let feedback_id = self.feedback_id;
            match undo {
                Undo::Context {
                    segments,
                    created_at,
                    previous,
                } => restore_pointer(platform_context, &segments, created_at, previous),
                Undo::File { path, previous } => {
                    let result = match previous {
                        Some(bytes) => fs::write(&path, bytes),
                        None => fs::remove_file(&path),
                    };
                    result.map_err(|source| OperationError::Io {
                        feedback_id,
                        path,
                        source,
                    })?;
                }
                Undo::Dirs(created) => {
                    for dir in created {
                        fs::remove_dir(&dir).map_err(|source| OperationError::Io {
                            feedback_id,
                            path: dir.clone(),
                            source,
                        })?;
                    }
                }
            }
            warn!(
                feedback_id,
                operation = self.operation.name(),
                "deferred operation rolled back"
            );
        }
        if self.state != OperationState::Failed {
            self.state = OperationState::RolledBack;
        }
        Ok(())
    }

    fn apply(
        &self,
        answers: &AnswerContext,
        platform_context: &mut Value,
        secrets: &SecretResolver,
    ) -> Result<Undo, OperationError> {
        let feedback_id = self.feedback_id;
        let resolve = |text: &str, field: &str| -> Result<String, OperationError> {
            let value = resolve_template(text, answers, feedback_id)?;
            secrets
                .resolve_secret(&value.to_string(), field)
                .map_err(|source| OperationError::Secret {
                    feedback_id,
                    source,
                })
        };

        match &self.operation {
            OperationKind::SetContext { pointer, value } => {
                let templated = resolve_templates(value, answers, feedback_id)?;
                let resolved = secrets
                    .resolve_context_secrets(&templated)
                    .map_err(|source| OperationError::Secret {
                        feedback_id,
                        source,
                    })?;
                let segments = parse_pointer(pointer).ok_or_else(|| OperationError::Pointer {
                    feedback_id,
                    pointer: pointer.clone(),
                    message: "pointer must be empty or start with '/'".to_string(),
                })?;
                write_pointer(platform_context, segments, resolved).map_err(|message| {
                    OperationError::Pointer {
                        feedback_id,
                        pointer: pointer.clone(),
                        message,
                    }
                })
            }
            OperationKind::WriteFile { path, contents } => {
                let path = PathBuf::from(resolve(path, "path")?);
                let contents = resolve(contents, "contents")?;
                let previous = match fs::read(&path) {
                    Ok(bytes) => Some(bytes),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => None,
                    Err(source) => {
                        return Err(OperationError::Io {
                            feedback_id,
                            path,
                            source,
                        });
                    }
                };
                if let Err(source) = fs::write(&path, contents) {
                    return Err(OperationError::Io {
                        feedback_id,
                        path,
                        source,
                    });
                }
                Ok(Undo::File { path, previous })
            }
            OperationKind::CreateDir { path } => {
                let path = PathBuf::from(resolve(path, "path")?);
                let created: Vec<PathBuf> = path
                    .ancestors()
                    .take_while(|dir| !dir.as_os_str().is_empty() && !dir.exists())
                    .map(Path::to_path_buf)
                    .collect();
                fs::create_dir_all(&path).map_err(|source| OperationError::Io {
                    feedback_id,
                    path: path.clone(),
                    source,
                })?;
                Ok(Undo::Dirs(created))
            }
        }
    }
}

fn resolve_template(
    text: &str,
    answers: &AnswerContext,
    feedback_id: u64,
) -> Result<AnswerValue, OperationError> {
    ExpressionEvaluator::new(answers)
        .evaluate(text)
        .map_err(|source| OperationError::Expression {
            feedback_id,
            source,
        })
}

fn resolve_templates(
    value: &Value,
    answers: &AnswerContext,
    feedback_id: u64,
) -> Result<Value, OperationError> {
    match value {
        Value::String(text) => Ok(resolve_template(text, answers, feedback_id)?.to_json()),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_templates(item, answers, feedback_id))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_templates(item, answers, feedback_id)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn parse_pointer(pointer: &str) -> Option<Vec<String>> {
    if pointer.is_empty() {
        return Some(Vec::new());
    }
    let rest = pointer.strip_prefix('/')?;
    Some(
        rest.split('/')
            .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
            .collect(),
    )
}

fn write_pointer(root: &mut Value, segments: Vec<String>, value: Value) -> Result<Undo, String> {
    if segments.is_empty() {
        let previous = std::mem::replace(root, value);
        return Ok(Undo::Context {
            segments,
            created_at: None,
            previous: Some(previous),
        });
    }

    let last = segments.len() - 1;
    let mut created_at = None;
    let mut current = root;
    for (depth, segment) in segments[..last].iter().enumerate() {
        let map = current
            .as_object_mut()
            .ok_or_else(|| format!("parent of '{segment}' is not an object"))?;
        if created_at.is_none() && !map.contains_key(segment) {
            created_at = Some(depth);
        }
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = current
        .as_object_mut()
        .ok_or_else(|| format!("parent of '{}' is not an object", segments[last]))?;
    let previous = map.insert(segments[last].clone(), value);
    Ok(Undo::Context {
        segments,
        created_at,
        previous,
    })
}

fn restore_pointer(
    root: &mut Value,
    segments: &[String],
    created_at: Option<usize>,
    previous: Option<Value>,
) {
    let Some(last) = segments.len().checked_sub(1) else {
        if let Some(previous) = previous {
            *root = previous;
        }
        return;
    };
    // Removing the first created ancestor also drops everything created beneath it.
    let target = created_at.unwrap_or(last);
    let mut current = root;
    for segment in &segments[..target] {
        match current.get_mut(segment) {
            Some(next) => current = next,
            None => return,
        }
    }
    let Value::Object(map) = current else {
        return;
    };
    let key = segments[target].clone();
    match previous {
        Some(previous) if created_at.is_none() => {
            map.insert(key, previous);
        }
        _ => {
            map.remove(&key);
        }
    }
}

/// Ordered collection of deferred operations with saga-style compensation.
#[derive(Debug, Clone, Default)]
pub struct DeferredOperationsRegistry {
    operations: Vec<DeferredOperation>,
}

impl DeferredOperationsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation: DeferredOperation) {
        debug!(
            feedback_id = operation.feedback_id,
            operation = operation.operation.name(),
            "deferred operation registered"
        );
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[DeferredOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Runs pending operations in order. On failure, the operations that already ran are
    /// rolled back in reverse and the original error is returned.
    ///
    /// Operations left failed or rolled back by an earlier run are pending again, so a
    /// retry runs the whole sequence.
    pub fn execute_all(
        &mut self,
        feedback_history: &[Feedback],
        platform_context: &mut Value,
        secrets: &SecretResolver,
    ) -> Result<(), OperationError> {
        for operation in &mut self.operations {
            if matches!(
                operation.state,
                OperationState::Failed | OperationState::RolledBack
            ) {
                debug!(
                    feedback_id = operation.feedback_id,
                    operation = operation.operation.name(),
                    "deferred operation queued for retry"
                );
                operation.state = OperationState::Pending;
                operation.undo = None;
            }
        }
        for index in 0..self.operations.len() {
            if self.operations[index].state != OperationState::Pending {
                continue;
            }
            if let Err(err) =
                self.operations[index].execute(feedback_history, platform_context, secrets)
            {
                warn!(
                    feedback_id = self.operations[index].feedback_id,
                    error = %err,
                    "deferred operation failed, compensating"
                );
                for earlier in self.operations[..index].iter_mut().rev() {
                    if earlier.state != OperationState::Executed {
                        continue;
                    }
                    if let Err(rollback_err) = earlier.rollback(platform_context) {
                        error!(
                            feedback_id = earlier.feedback_id,
                            error = %rollback_err,
                            "rollback failed"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Rolls back every operation in reverse without executing anything.
    ///
    /// All operations are attempted; the first rollback failure is returned.
    pub fn rollback_all(&mut self, platform_context: &mut Value) -> Result<(), OperationError> {
        let mut first_error = None;
        for operation in self.operations.iter_mut().rev() {
            if let Err(err) = operation.rollback(platform_context) {
                error!(feedback_id = operation.feedback_id, error = %err, "rollback failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }

    pub fn serialize(&self) -> Vec<DeferredOperation> {
        self.operations.clone()
    }

    /// Rebuilds a registry from persisted operations; all of them come back pending.
    pub fn from_serialized(operations: Vec<DeferredOperation>) -> Self {
        Self {
            operations: operations
                .into_iter()
                .map(|operation| DeferredOperation::new(operation.feedback_id, operation.operation))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision_spec::EntryData;
    use serde_json::json;
    use time::OffsetDateTime;

    fn history() -> Vec<Feedback> {
        vec![Feedback {
            feedback_id: 0,
            timestamp: OffsetDateTime::UNIX_EPOCH,
            workflow: "database".into(),
            entry: "db_name".into(),
            entry_data: EntryData::string("orders"),
            is_automatic: false,
            is_sensitive: false,
        }]
    }

    fn set_context(pointer: &str, value: Value) -> OperationKind {
        OperationKind::SetContext {
            pointer: pointer.into(),
            value,
        }
    }

    #[test]
    fn set_context_resolves_answers_and_rolls_back() {
        let secrets = SecretResolver::in_memory();
        let mut context = json!({ "db": { "port": 5432 } });
        let mut op = DeferredOperation::new(0, set_context("/db/name", json!("${db_name}")));
        op.execute(&history(), &mut context, &secrets).expect("execute");
        assert_eq!(context, json!({ "db": { "name": "orders", "port": 5432 } }));
        op.rollback(&mut context).expect("rollback");
        assert_eq!(context, json!({ "db": { "port": 5432 } }));
        assert_eq!(op.state(), OperationState::RolledBack);
    }

    #[test]
    fn set_context_rollback_removes_created_parents() {
        let secrets = SecretResolver::in_memory();
        let mut context = json!({});
        let mut op = DeferredOperation::new(0, set_context("/a/b/c", json!(1)));
        op.execute(&history(), &mut context, &secrets).expect("execute");
        assert_eq!(context, json!({ "a": { "b": { "c": 1 } } }));
        op.rollback(&mut context).expect("rollback");
        assert_eq!(context, json!({}));
    }

    #[test]
    fn set_context_restores_overwritten_value() {
        let secrets = SecretResolver::in_memory();
        let mut context = json!({ "region": "eu" });
        let mut op = DeferredOperation::new(0, set_context("/region", json!("us")));
        op.execute(&history(), &mut context, &secrets).expect("execute");
        assert_eq!(context["region"], "us");
        op.rollback(&mut context).expect("rollback");
        assert_eq!(context["region"], "eu");
    }

    #[test]
    fn pointer_through_scalar_is_error() {
        let secrets = SecretResolver::in_memory();
        let mut context = json!({ "region": "eu" });
        let mut op = DeferredOperation::new(0, set_context("/region/zone", json!("a")));
        let err = op
            .execute(&history(), &mut context, &secrets)
            .expect_err("scalar parent");
        assert!(matches!(err, OperationError::Pointer { feedback_id: 0, .. }));
        assert_eq!(op.state(), OperationState::Failed);
    }

    #[test]
    fn unknown_answer_reference_fails() {
        let secrets = SecretResolver::in_memory();
        let mut context = json!({});
        let mut op = DeferredOperation::new(0, set_context("/x", json!("${missing}")));
        let err = op
            .execute(&history(), &mut context, &secrets)
            .expect_err("unknown reference");
        assert!(matches!(err, OperationError::Expression { .. }));
    }

    fn registry(ops: Vec<OperationKind>) -> DeferredOperationsRegistry {
        let mut registry = DeferredOperationsRegistry::new();
        for op in ops {
            registry.register(DeferredOperation::new(0, op));
        }
        registry
    }

    fn states(registry: &DeferredOperationsRegistry) -> Vec<OperationState> {
        registry.operations().iter().map(DeferredOperation::state).collect()
    }

    #[test]
    fn retry_after_failure_runs_every_operation() {
        let secrets = SecretResolver::in_memory();
        let mut registry = registry(vec![
            set_context("/first", json!("${db_name}")),
            set_context("/token", json!("$RETRY_TOKEN")),
            set_context("/last", json!(true)),
        ]);
        let mut context = json!({});
        registry
            .execute_all(&history(), &mut context, &secrets)
            .expect_err("secret not set yet");
        assert_eq!(
            states(&registry),
            vec![
                OperationState::RolledBack,
                OperationState::Failed,
                OperationState::Pending
            ]
        );
        assert_eq!(context, json!({}));

        secrets.export("RETRY_TOKEN", "abc").expect("export");
        registry
            .execute_all(&history(), &mut context, &secrets)
            .expect("retry");
        assert_eq!(states(&registry), vec![OperationState::Executed; 3]);
        assert_eq!(
            context,
            json!({ "first": "orders", "token": "abc", "last": true })
        );
    }

    #[test]
    fn executed_operations_are_not_run_twice() {
        let secrets = SecretResolver::in_memory();
        let mut registry = registry(vec![set_context("/count", json!(1))]);
        let mut context = json!({});
        registry
            .execute_all(&history(), &mut context, &secrets)
            .expect("execute");
        context["count"] = json!(2);
        registry
            .execute_all(&history(), &mut context, &secrets)
            .expect("execute again");
        assert_eq!(context["count"], 2);
    }

    #[test]
    fn rollback_all_compensates_executed_operations() {
        let secrets = SecretResolver::in_memory();
        let mut registry = registry(vec![
            set_context("/region", json!("us")),
            set_context("/region", json!("ap")),
            set_context("/zones/primary", json!("a")),
        ]);
        let mut context = json!({ "region": "eu" });
        registry
            .execute_all(&history(), &mut context, &secrets)
            .expect("execute");
        assert_eq!(context, json!({ "region": "ap", "zones": { "primary": "a" } }));

        registry.rollback_all(&mut context).expect("rollback");
        assert_eq!(context, json!({ "region": "eu" }));
        assert_eq!(states(&registry), vec![OperationState::RolledBack; 3]);
    }

    #[test]
    fn restored_operations_are_pending() {
        let mut registry = DeferredOperationsRegistry::new();
        registry.register(DeferredOperation::new(0, set_context("/x", json!(1))));
        let secrets = SecretResolver::in_memory();
        let mut context = json!({});
        registry
            .execute_all(&history(), &mut context, &secrets)
            .expect("execute");
        let persisted = serde_json::to_value(registry.serialize()).expect("serialize");
        let restored = DeferredOperationsRegistry::from_serialized(
            serde_json::from_value(persisted).expect("deserialize"),
        );
        assert_eq!(restored.operations()[0].state(), OperationState::Pending);
    }
}
