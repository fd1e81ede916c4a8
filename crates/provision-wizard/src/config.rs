use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Overrides the session store location when `--store` is absent.
pub const STORE_ENV: &str = "PROVISION_WIZARD_STORE";
pub const STORE_FILE: &str = "sessions.json";

/// `--store`, then `PROVISION_WIZARD_STORE`, then the platform data directory.
pub fn resolve_store_path(explicit: Option<&Path>) -> Result<PathBuf> {
    store_path_from(explicit, env::var_os(STORE_ENV).map(PathBuf::from))
}

fn store_path_from(explicit: Option<&Path>, from_env: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = from_env
        && !path.as_os_str().is_empty()
    {
        return Ok(path);
    }
    let dirs = ProjectDirs::from("ai", "greentic", "provision-wizard")
        .context("cannot determine a data directory; pass --store or set PROVISION_WIZARD_STORE")?;
    Ok(dirs.data_dir().join(STORE_FILE))
}
