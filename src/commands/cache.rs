/// `xlab cache` command implementation
///
/// Lists, shows and aliases fingerprint entries.
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use xlab::coordinator::{CONFIG_FILE, ERROR_FILE};
use xlab::storage::read_json;
use xlab::{CacheEntry, CacheStore, Fingerprint, Params, Project};

use super::open_project;
use crate::cli::{CacheArgs, CacheCommands};
use crate::cli_utils::{completion_mark, xlab_prefix};

#[derive(Serialize)]
struct EntryOutput {
    fingerprint: Fingerprint,
    dir: String,
    complete: bool,
}

#[derive(Serialize)]
struct ShowOutput {
    fingerprint: Fingerprint,
    dir: PathBuf,
    complete: bool,
    failed: bool,
    config: Option<Params>,
}

pub fn cache(args: CacheArgs, root: Option<&Path>) -> Result<()> {
    let project = open_project(root)?;
    let cache = CacheStore::open(&project).context("Failed to open the fingerprint cache")?;

    match args.command {
        CacheCommands::List { complete, json } => list(&cache, complete, json),
        CacheCommands::Show { fingerprint, json } => show(&project, &cache, &fingerprint, json),
        CacheCommands::Alias { new, old } => alias(&cache, &new, &old),
    }
}

fn list(cache: &CacheStore, only_complete: bool, json: bool) -> Result<()> {
    let entries: Vec<EntryOutput> = cache
        .entries()?
        .into_iter()
        .filter(|(_, entry)| entry.complete || !only_complete)
        .map(|(fingerprint, CacheEntry { dir, complete })| EntryOutput {
            fingerprint,
            dir,
            complete,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{} No runs recorded", xlab_prefix());
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}  {:<10} {}",
            entry.fingerprint,
            completion_mark(entry.complete),
            entry.dir
        );
    }
    Ok(())
}

fn show(project: &Project, cache: &CacheStore, fingerprint: &str, json: bool) -> Result<()> {
    let fingerprint = Fingerprint::from_raw(fingerprint.trim());
    let dir = cache.get_dir(&fingerprint)?;
    let complete = cache.is_complete(&fingerprint)?;

    let config_path = dir.join(CONFIG_FILE);
    let config: Option<Params> = if config_path.exists() {
        Some(read_json(&config_path)?)
    } else {
        None
    };

    let output = ShowOutput {
        dir: project.relative_to_root(&dir).unwrap_or_else(|_| dir.clone()),
        failed: dir.join(ERROR_FILE).exists(),
        fingerprint,
        complete,
        config,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{} Fingerprint: {}", xlab_prefix(), output.fingerprint);
    println!("{} Directory: {}", xlab_prefix(), output.dir.display());
    println!(
        "{} Status: {}",
        xlab_prefix(),
        if output.failed {
            "failed"
        } else {
            completion_mark(output.complete)
        }
    );
    if let Some(config) = &output.config {
        println!("{} Parameters:", xlab_prefix());
        for (key, value) in config.iter() {
            println!("    {} = {}", key, value);
        }
    }
    Ok(())
}

fn alias(cache: &CacheStore, new: &str, old: &str) -> Result<()> {
    let new = Fingerprint::from_raw(new.trim());
    let old = Fingerprint::from_raw(old.trim());
    cache.merge_hashes(&new, &old)?;

    println!(
        "{} {} now resolves to {}",
        xlab_prefix(),
        new,
        cache.get_dir(&new)?.display()
    );
    Ok(())
}
