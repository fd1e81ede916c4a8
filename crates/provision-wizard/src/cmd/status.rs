use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use provision_store::SessionStore;
use serde::Serialize;

use crate::blob::SessionBlob;

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, value_name = "ID")]
    pub session: String,
    /// Session store file
    #[arg(long, value_name = "PATH")]
    pub store: Option<PathBuf>,
    /// Print the transcript as JSON
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusLine<'a> {
    feedback_id: u64,
    entry: &'a str,
    value: String,
    automatic: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    session: &'a str,
    workflow_version_hash: &'a str,
    waiting_on: Option<&'a str>,
    workflow: &'a str,
    pending_operations: usize,
    feedback: Vec<StatusLine<'a>>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let store = super::open_store(args.store.as_deref())?;
    let value = store
        .load(&args.session)?
        .with_context(|| format!("no stored session '{}'", args.session))?;
    let blob = SessionBlob::from_value(&value)
        .with_context(|| format!("stored session '{}' is malformed", args.session))?;

    let report = StatusReport {
        session: &args.session,
        workflow_version_hash: &blob.workflow_version_hash,
        waiting_on: blob.current_level.stopped_at_entry.as_deref(),
        workflow: &blob.current_level.workflow,
        pending_operations: blob.deferred_operations.len(),
        feedback: blob
            .feedback_history
            .iter()
            .map(|feedback| StatusLine {
                feedback_id: feedback.feedback_id,
                entry: &feedback.entry,
                value: feedback.display_value(),
                automatic: feedback.is_automatic,
            })
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Session {}", report.session);
    println!("  workflow version: {}", report.workflow_version_hash);
    for line in &report.feedback {
        let marker = if line.automatic { " (automatic)" } else { "" };
        println!(
            "  #{} {} = {}{marker}",
            line.feedback_id, line.entry, line.value
        );
    }
    match report.waiting_on {
        Some(entry) => println!("  waiting on '{entry}' in '{}'", report.workflow),
        None => println!("  all questions answered"),
    }
    println!("  pending operations: {}", report.pending_operations);
    Ok(())
}
