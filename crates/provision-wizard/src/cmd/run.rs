use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use provision_spec::{AnswerValue, Entry, EntryData, EntryType, MASK, SecretResolver};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::observer::{CompletionReason, Notification, TracingObserver, WizardObserver};
use crate::session::{SessionStart, WizardSession};
use crate::traverser::{AnswerOutcome, QuestionPathTraverser};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Workflow definition (.json or .toml)
    #[arg(long, value_name = "FILE")]
    pub workflow: PathBuf,
    #[arg(long, value_name = "ID")]
    pub session: String,
    /// Session store file
    #[arg(long, value_name = "PATH")]
    pub store: Option<PathBuf>,
    /// Answer questions from a JSON object keyed by entry id instead of prompting
    #[arg(long = "answers", value_name = "answers.json")]
    pub answers: Option<PathBuf>,
    /// Initial platform context handed to deferred operations
    #[arg(long = "context", value_name = "ctx.json")]
    pub context: Option<PathBuf>,
    /// Where to write the platform context after deferred operations ran
    #[arg(long = "context-out", value_name = "PATH")]
    pub context_out: Option<PathBuf>,
}

/// Renders the transcript on stdout.
#[derive(Debug, Default)]
struct TerminalObserver;

impl WizardObserver for TerminalObserver {
    fn notify(&mut self, notification: &Notification) {
        match notification {
            Notification::NextQuestionReady { .. } => {}
            Notification::FeedbackEntered { feedback, is_new } => {
                if !is_new {
                    println!("  {} = {}", feedback.entry, feedback.display_value());
                } else if feedback.is_automatic {
                    println!(
                        "  {} = {} (automatic)",
                        feedback.entry,
                        feedback.display_value()
                    );
                }
            }
            Notification::Completed { reason } => match reason {
                CompletionReason::Finished => println!("All questions answered."),
                CompletionReason::EmptyWorkflow => println!("Workflow has no questions."),
                CompletionReason::Abandoned => println!("Session abandoned."),
            },
            Notification::SessionRestored {
                session_id,
                feedback_count,
            } => {
                println!("Resuming session {session_id} ({feedback_count} answers recorded)");
            }
        }
    }
}

enum AnswerSource {
    Terminal,
    File(Map<String, Value>),
}

pub fn run(args: RunArgs) -> Result<()> {
    let workflow = super::load_workflow(&args.workflow)?;
    let store = super::open_store(args.store.as_deref())?;
    let mut source = match &args.answers {
        Some(path) => AnswerSource::File(read_json_object(path)?),
        None => AnswerSource::Terminal,
    };

    let mut traverser = QuestionPathTraverser::new(workflow, SecretResolver::process_env())?
        .with_session_id(args.session.as_str());
    traverser.register_observer(TracingObserver);
    traverser.register_observer(TerminalObserver);
    let mut session = WizardSession::new(store, traverser);

    if let SessionStart::Resumed { .. } = session.open(OffsetDateTime::now_utc())? {
        session.traverser_mut().replay_history();
    }

    while let Some(entry) = session.traverser().get_current_question().cloned() {
        let entry_data = match &mut source {
            AnswerSource::Terminal => prompt_entry(&entry)?,
            AnswerSource::File(answers) => match answers.remove(&entry.id) {
                Some(value) => EntryData::from_json(entry.kind, &value)
                    .with_context(|| format!("answer for '{}' has the wrong type", entry.id))?,
                None => {
                    println!(
                        "No answer for '{}'; session {} suspended.",
                        entry.id, args.session
                    );
                    return Ok(());
                }
            },
        };
        if let AnswerOutcome::Rejected(result) =
            session.answer(entry_data, OffsetDateTime::now_utc())?
        {
            let message = result.message.unwrap_or_else(|| "invalid answer".to_string());
            if matches!(source, AnswerSource::File(_)) {
                bail!("answer for '{}' rejected: {message}", entry.id);
            }
            println!("{message}");
        }
    }

    let mut context = match &args.context {
        Some(path) => Value::Object(read_json_object(path)?),
        None => Value::Object(Map::new()),
    };
    session
        .finish(&mut context)
        .context("deferred operations failed; completed ones were rolled back")?;

    let rendered = serde_json::to_string_pretty(&context)?;
    match &args.context_out {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("failed to write context {}", path.display()))?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} must hold a JSON object", path.display()))
}

fn prompt_entry(entry: &Entry) -> Result<EntryData> {
    if let Some(help) = &entry.help_text {
        println!("{help}");
    }
    if entry.kind == EntryType::Choice
        && let Some(choices) = &entry.rules.choices
    {
        for (idx, choice) in choices.iter().enumerate() {
            println!("  {}. {choice}", idx + 1);
        }
    }
    let default = entry.default.as_ref().map(|value| {
        if entry.sensitive {
            MASK.to_string()
        } else {
            value.to_string()
        }
    });
    loop {
        let line = read_line(&entry.prompt, default.as_deref())?;
        if line.is_empty() {
            match &entry.default {
                Some(value) => return Ok(EntryData::new(entry.kind, value.clone())?),
                None => {
                    println!("A value is required.");
                    continue;
                }
            }
        }
        match parse_answer(entry, &line) {
            Some(value) => return Ok(EntryData::new(entry.kind, value)?),
            None => println!("Please enter a valid {} value.", entry.kind),
        }
    }
}

fn read_line(prompt: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(value) => print!("{prompt} [{value}]: "),
        None => print!("{prompt}: "),
    }
    io::stdout().flush()?;
    let mut input = String::new();
    let read = io::stdin().read_line(&mut input)?;
    if read == 0 {
        bail!("stdin closed");
    }
    Ok(input.trim().to_string())
}

/// Parses terminal input for `entry`. Choice input may be the option text or its 1-based index.
fn parse_answer(entry: &Entry, input: &str) -> Option<AnswerValue> {
    match entry.kind {
        EntryType::String => Some(AnswerValue::String(input.to_string())),
        EntryType::Integer => input.parse().ok().map(AnswerValue::Integer),
        EntryType::Boolean => match input.to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" => Some(AnswerValue::Boolean(true)),
            "n" | "no" | "false" => Some(AnswerValue::Boolean(false)),
            _ => None,
        },
        EntryType::Choice => {
            let choices = entry.rules.choices.as_deref().unwrap_or_default();
            let picked = input
                .parse::<usize>()
                .ok()
                .and_then(|idx| idx.checked_sub(1))
                .and_then(|idx| choices.get(idx))
                .cloned()
                .unwrap_or_else(|| input.to_string());
            Some(AnswerValue::String(picked))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_boolean_tokens() {
        let entry = Entry::new("agree", EntryType::Boolean, "Agree?");
        assert_eq!(parse_answer(&entry, "Yes"), Some(AnswerValue::Boolean(true)));
        assert_eq!(parse_answer(&entry, "n"), Some(AnswerValue::Boolean(false)));
        assert_eq!(parse_answer(&entry, "maybe"), None);
    }

    #[test]
    fn parses_choice_by_index_or_text() {
        let entry = Entry::new("color", EntryType::Choice, "Color").with_choices(["red", "yellow"]);
        assert_eq!(parse_answer(&entry, "2"), Some(AnswerValue::from("yellow")));
        assert_eq!(parse_answer(&entry, "red"), Some(AnswerValue::from("red")));
        assert_eq!(parse_answer(&entry, "7"), Some(AnswerValue::from("7")));
    }

    #[test]
    fn integer_input_must_parse() {
        let entry = Entry::new("age", EntryType::Integer, "Age");
        assert_eq!(parse_answer(&entry, "30"), Some(AnswerValue::Integer(30)));
        assert_eq!(parse_answer(&entry, "thirty"), None);
    }
}
