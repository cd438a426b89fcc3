use anyhow::{Context, Result};
use std::path::Path;

use xlab::probe::probe;
use xlab::Params;

use super::open_project;
use crate::cli::ProbeArgs;

/// Print the driver's answer on stdout, exactly as the driver printed it
pub fn run(args: ProbeArgs, root: Option<&Path>) -> Result<()> {
    let project = open_project(root)?;
    let config = Params::from_json_str(&args.config).context("Failed to parse --config")?;

    let answer = probe(&project, &args.command, &config, args.query)?;
    println!("{}", answer);
    Ok(())
}
