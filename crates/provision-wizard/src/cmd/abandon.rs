use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use provision_spec::SecretResolver;
use provision_store::SessionStore;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::observer::TracingObserver;
use crate::session::WizardSession;
use crate::traverser::QuestionPathTraverser;

#[derive(Args, Debug, Clone)]
pub struct AbandonArgs {
    /// Workflow definition the session was started with
    #[arg(long, value_name = "FILE")]
    pub workflow: PathBuf,
    #[arg(long, value_name = "ID")]
    pub session: String,
    /// Session store file
    #[arg(long, value_name = "PATH")]
    pub store: Option<PathBuf>,
}

pub fn run(args: AbandonArgs) -> Result<()> {
    let workflow = super::load_workflow(&args.workflow)?;
    let store = super::open_store(args.store.as_deref())?;
    if store.load(&args.session)?.is_none() {
        bail!("no stored session '{}'", args.session);
    }

    let mut traverser = QuestionPathTraverser::new(workflow, SecretResolver::process_env())?
        .with_session_id(args.session.as_str());
    traverser.register_observer(TracingObserver);
    let mut session = WizardSession::new(store, traverser);
    session
        .open(OffsetDateTime::now_utc())
        .with_context(|| format!("failed to restore session '{}'", args.session))?;

    let mut context = Value::Object(Map::new());
    session.abandon(&mut context)?;
    println!("Session {} abandoned.", args.session);
    Ok(())
}
