use clap::{Parser, Subcommand};
use std::path::PathBuf;

use xlab::Query;

/// xlab - Memoized runs for computational experiments
///
/// Each distinct set of parameters gets its own run directory; completed runs
/// are reused instead of recomputed.
#[derive(Parser, Debug)]
#[command(name = "xlab")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Memoized runs for computational experiments", long_about = None)]
pub struct Cli {
    /// Project root (defaults to the nearest directory containing `.exp`)
    #[arg(long, global = true, env = "XLAB_ROOT")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Project setup and inspection
    Project(ProjectArgs),

    /// Inspect and edit the fingerprint cache
    Cache(CacheArgs),

    /// Print the fingerprint of a JSON parameter mapping
    Hash(HashArgs),

    /// Ask a driver for its fingerprint, directory or completion status
    Probe(ProbeArgs),
}

#[derive(Parser, Debug)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub command: ProjectCommands,
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Mark a directory as a project root
    Init {
        /// Directory to initialize (defaults to --root, then the current directory)
        path: Option<PathBuf>,

        /// Overwrite an existing `.exp/config.toml` with the template
        #[arg(long)]
        force: bool,
    },

    /// Show the project root, layout and counters
    Info {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List every fingerprint and its run directory
    List {
        /// Only show completed runs
        #[arg(long)]
        complete: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one entry and the parameters recorded for it
    Show {
        /// Fingerprint of the run
        fingerprint: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Make a fingerprint resolve to the run of another one
    Alias {
        /// Fingerprint to add
        new: String,

        /// Fingerprint whose run it should resolve to
        old: String,
    },
}

#[derive(Parser, Debug)]
pub struct HashArgs {
    /// Parameters as a JSON object
    pub params: String,

    /// Parameter names left out of the fingerprint
    #[arg(long, value_delimiter = ',')]
    pub ignore: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// What to ask: hash, dir or complete
    pub query: Query,

    /// Parameters passed to the driver as its embedded configuration
    #[arg(long, default_value = "{}")]
    pub config: String,

    /// Driver command line
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}
