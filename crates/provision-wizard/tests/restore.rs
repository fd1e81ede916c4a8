use std::sync::mpsc;

use provision_spec::{Entry, EntryData, EntryType, SecretResolver};
use provision_store::{FileSessionStore, SessionStore};
use provision_wizard::{
    Notification, OperationKind, QuestionPathTraverser, SessionStart, WizardError, WizardSession,
    Workflow,
};
use serde_json::{Map, json};
use time::OffsetDateTime;

fn now() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

fn workflow() -> Workflow {
    Workflow::new(vec![
        Entry::new("name", EntryType::String, "Name"),
        Entry::new("age", EntryType::Integer, "Age"),
        Entry::new("agree", EntryType::Boolean, "Agree?"),
    ])
    .with_sub_workflow(
        "contact",
        vec![Entry::new("email", EntryType::String, "Email")],
    )
}

fn traverser(workflow: Workflow) -> QuestionPathTraverser {
    QuestionPathTraverser::new(workflow, SecretResolver::in_memory())
        .expect("traverser")
        .with_session_id("s1")
}

#[test]
fn restore_reproduces_position_and_history() {
    let mut original = traverser(workflow());
    original.start(now()).expect("start");
    original
        .answer_current_question(EntryData::string("Alice"), now())
        .expect("answer");
    original
        .push_level("contact", Map::new(), now())
        .expect("push");
    original
        .register_operation(OperationKind::SetContext {
            pointer: "/owner".into(),
            value: json!("${name}"),
        })
        .expect("register");
    let blob = original.serialize().expect("serialize");
    let value = blob.to_value().expect("json");

    let mut restored = traverser(workflow());
    let (tx, rx) = mpsc::channel();
    restored.register_observer(tx);
    restored.restore(&value, now()).expect("restore");

    assert_eq!(restored.feedback_history(), original.feedback_history());
    assert_eq!(restored.current_level(), original.current_level());
    assert_eq!(restored.level_stack(), original.level_stack());
    assert_eq!(restored.deferred().len(), 1);
    assert_eq!(
        restored.get_current_question().map(|entry| entry.id.as_str()),
        Some("email")
    );

    let events: Vec<Notification> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![Notification::SessionRestored {
            session_id: "s1".into(),
            feedback_count: 1
        }]
    );

    restored
        .answer_current_question(EntryData::string("a@example.com"), now())
        .expect("answer");
    assert_eq!(
        restored.get_current_question().map(|entry| entry.id.as_str()),
        Some("age")
    );
    assert_eq!(restored.feedback_history().last().map(|f| f.feedback_id), Some(1));
}

#[test]
fn restoring_finished_session_only_reports_restore() {
    let mut original = traverser(Workflow::new(vec![Entry::new(
        "name",
        EntryType::String,
        "Name",
    )]));
    original.start(now()).expect("start");
    original
        .answer_current_question(EntryData::string("Alice"), now())
        .expect("answer");
    assert!(original.is_complete());
    let value = original.serialize().expect("serialize").to_value().expect("json");

    let mut restored = traverser(Workflow::new(vec![Entry::new(
        "name",
        EntryType::String,
        "Name",
    )]));
    let (tx, rx) = mpsc::channel();
    restored.register_observer(tx);
    restored.restore(&value, now()).expect("restore");

    assert!(restored.is_complete());
    let events: Vec<Notification> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![Notification::SessionRestored {
            session_id: "s1".into(),
            feedback_count: 1
        }]
    );
}

#[test]
fn entry_ids_may_repeat_across_sub_workflows() {
    let workflow = || {
        Workflow::new(vec![
            Entry::new("name", EntryType::String, "Project name"),
            Entry::new("confirm", EntryType::Boolean, "Confirm?"),
        ])
        .with_sub_workflow(
            "db",
            vec![Entry::new("name", EntryType::Integer, "Shard number")],
        )
    };
    let mut original = traverser(workflow());
    original.start(now()).expect("start");
    original
        .answer_current_question(EntryData::string("shop"), now())
        .expect("answer");
    original.push_level("db", Map::new(), now()).expect("push");
    original
        .answer_current_question(EntryData::integer(5), now())
        .expect("answer");
    assert_eq!(original.feedback_history()[1].workflow, "db");
    let value = original.serialize().expect("serialize").to_value().expect("json");

    let mut restored = traverser(workflow());
    restored.restore(&value, now()).expect("restore");
    assert_eq!(restored.feedback_history(), original.feedback_history());
    assert_eq!(
        restored.get_current_question().map(|entry| entry.id.as_str()),
        Some("confirm")
    );
}

#[test]
fn restore_refuses_feedback_from_wrong_list() {
    let mut original = traverser(workflow());
    original.start(now()).expect("start");
    original
        .answer_current_question(EntryData::string("Alice"), now())
        .expect("answer");
    let mut value = original.serialize().expect("serialize").to_value().expect("json");
    value["feedback_history"][0]["workflow"] = json!("contact");

    let err = traverser(workflow())
        .restore(&value, now())
        .expect_err("unknown entry in list");
    assert!(matches!(err, WizardError::Schema(message) if message.contains("'name' in 'contact'")));
}

#[test]
fn restore_refuses_changed_workflow() {
    let mut original = traverser(workflow());
    original.start(now()).expect("start");
    let value = original.serialize().expect("serialize").to_value().expect("json");

    let mut edited = workflow();
    edited.entries[0].prompt = "Full name".into();
    let mut restored = traverser(edited);
    let err = restored.restore(&value, now()).expect_err("hash mismatch");
    assert!(matches!(err, WizardError::VersionMismatch { .. }));
    assert!(!restored.is_started());
}

#[test]
fn restore_refuses_missing_fields() {
    let mut original = traverser(workflow());
    original.start(now()).expect("start");
    let mut value = original.serialize().expect("serialize").to_value().expect("json");
    value
        .as_object_mut()
        .expect("object")
        .remove("feedback_history");

    let err = traverser(workflow())
        .restore(&value, now())
        .expect_err("schema");
    assert!(matches!(err, WizardError::Schema(_)));
}

#[test]
fn restore_refuses_inconsistent_index() {
    let mut original = traverser(workflow());
    original.start(now()).expect("start");
    original
        .answer_current_question(EntryData::string("Alice"), now())
        .expect("answer");
    let mut value = original.serialize().expect("serialize").to_value().expect("json");
    value["current_entry_index"] = json!(2);

    let err = traverser(workflow())
        .restore(&value, now())
        .expect_err("inconsistent");
    assert!(matches!(err, WizardError::Schema(_)));
}

#[test]
fn file_store_session_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");

    {
        let mut session = WizardSession::new(FileSessionStore::new(&path), traverser(workflow()));
        assert_eq!(session.open(now()).expect("open"), SessionStart::Started);
        session
            .answer(EntryData::string("Alice"), now())
            .expect("answer");
        session.answer(EntryData::integer(30), now()).expect("answer");
    }

    let store = FileSessionStore::new(&path);
    assert_eq!(store.list().expect("list"), vec!["s1".to_string()]);
    let mut session = WizardSession::new(store, traverser(workflow()));
    assert_eq!(
        session.open(now()).expect("open"),
        SessionStart::Resumed { feedback_count: 2 }
    );
    session
        .answer(EntryData::boolean(true), now())
        .expect("answer");
    let mut context = json!({});
    session.finish(&mut context).expect("finish");
    assert_eq!(
        FileSessionStore::new(&path).load("s1").expect("load"),
        None
    );
}
