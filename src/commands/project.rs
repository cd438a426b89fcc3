//! `xlab project` command implementation
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use xlab::config::{XlabConfig, CONFIG_FILE};
use xlab::{CacheStore, Project};

use super::open_project;
use crate::cli::ProjectCommands;
use crate::cli_utils::xlab_prefix;

#[derive(Serialize)]
struct InfoOutput {
    root: PathBuf,
    runs_dir: PathBuf,
    hash_ignore: Vec<String>,
    next_id: u64,
    entries: usize,
    complete: usize,
}

pub fn run(command: ProjectCommands, root: Option<&Path>) -> Result<()> {
    match command {
        ProjectCommands::Init { path, force } => init(path.as_deref().or(root), force),
        ProjectCommands::Info { json } => show_info(root, json),
    }
}

fn init(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let project = Project::init(&path)?;
    let config_path = project.exp_path().join(CONFIG_FILE);
    if force || !config_path.exists() {
        fs::write(&config_path, XlabConfig::template())
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }

    // Creates the stores so concurrent first runs never race on them
    CacheStore::open(&project)?;
    info!(root = %project.root().display(), "project initialized");

    println!(
        "{} Initialized project in {}",
        xlab_prefix(),
        project.root().display()
    );
    println!("{} Configuration: {}", xlab_prefix(), config_path.display());
    Ok(())
}

fn show_info(root: Option<&Path>, json: bool) -> Result<()> {
    let project = open_project(root)?;
    let cache = CacheStore::open(&project)?;
    let entries = cache.entries()?;

    let output = InfoOutput {
        root: project.root().to_path_buf(),
        runs_dir: project.root().join(&project.config().runs.dir),
        hash_ignore: project.config().hash.ignore.clone(),
        next_id: cache.metadata().peek()?,
        entries: entries.len(),
        complete: entries.iter().filter(|(_, e)| e.complete).count(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{} Root: {}", xlab_prefix(), output.root.display());
    println!("{} Runs: {}", xlab_prefix(), output.runs_dir.display());
    if !output.hash_ignore.is_empty() {
        println!(
            "{} Ignored parameters: {}",
            xlab_prefix(),
            output.hash_ignore.join(", ")
        );
    }
    println!("{} Next run id: {}", xlab_prefix(), output.next_id);
    println!(
        "{} Fingerprints: {} ({} complete)",
        xlab_prefix(),
        output.entries,
        output.complete
    );
    Ok(())
}
