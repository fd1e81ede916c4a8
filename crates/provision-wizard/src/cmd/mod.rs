pub mod abandon;
pub mod hash;
pub mod run;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};
use provision_store::FileSessionStore;

use crate::config;
use crate::workflow::Workflow;

pub(crate) fn load_workflow(path: &Path) -> Result<Workflow> {
    Workflow::load(path).with_context(|| format!("failed to load workflow {}", path.display()))
}

pub(crate) fn open_store(explicit: Option<&Path>) -> Result<FileSessionStore> {
    let path = config::resolve_store_path(explicit)?;
    tracing::debug!(path = %path.display(), "using session store");
    Ok(FileSessionStore::new(path))
}
