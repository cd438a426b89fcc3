pub mod cache;
pub mod hash;
pub mod probe;
pub mod project;

use anyhow::Result;
use std::path::Path;

use xlab::Project;

/// Project named by `--root` / `XLAB_ROOT`, or the nearest one above the
/// working directory
pub(crate) fn open_project(root: Option<&Path>) -> Result<Project> {
    let project = match root {
        Some(root) => Project::open(root)?,
        None => Project::discover()?,
    };
    Ok(project)
}
