mod cli;
mod cli_utils;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    xlab::logging::init();

    let cli = Cli::parse();
    let root = cli.root.as_deref();

    match cli.command {
        Commands::Project(args) => commands::project::run(args.command, root),
        Commands::Cache(args) => commands::cache::cache(args, root),
        Commands::Hash(args) => commands::hash::run(args),
        Commands::Probe(args) => commands::probe::run(args, root),
    }
}
