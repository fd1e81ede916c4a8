use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct HashArgs {
    /// Workflow definition (.json or .toml)
    #[arg(long, value_name = "FILE")]
    pub workflow: PathBuf,
}

pub fn run(args: HashArgs) -> Result<()> {
    let workflow = super::load_workflow(&args.workflow)?;
    println!("{}", workflow.version_hash());
    Ok(())
}
