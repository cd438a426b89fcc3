//! Run coordination for driver executables.
//!
//! A driver resolves its parameters, asks [`Setup::enter`] what to do, and
//! either stops (cache hit, probe answer, busy) or runs its payload through
//! the returned [`RunHandle`]:
//!
//! ```text
//! Start -> Resolved -> HitComplete
//!                   -> HitQuery
//!                   -> Locked-Pending -> Succeeded
//!                                     -> Failed (retried on next invocation)
//! ```
//!
//! The per-run lock is held from the completion re-check until the payload
//! finishes, so at most one process runs the payload of a fingerprint.

use clap::Args;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, Fingerprintable};
use crate::lock::{LockGuard, RwFileLock};
use crate::logging::{operations, status};
use crate::params::Params;
use crate::project::Project;
use crate::storage::write_json_atomic;

pub const CONFIG_FLAG: &str = "--exp-config";
pub const DIR_FLAG: &str = "--exp-dir";
pub const HASH_FLAG: &str = "--exp-hash";
pub const IS_COMPLETE_FLAG: &str = "--exp-is-complete";
pub const FORCE_FLAG: &str = "--exp-force";
pub const NO_WAIT_FLAG: &str = "--exp-no-wait";

/// Control keys never persisted nor hashed, even if an override carries them
pub const CONTROL_KEYS: [&str; 6] = [
    "exp_config",
    "exp_dir",
    "exp_hash",
    "exp_is_complete",
    "exp_force",
    "exp_no_wait",
];

/// Default parameter naming the driver executable. Hash-relevant.
pub const EXECUTABLE_KEY: &str = "executable";
/// Default parameter recording when the config was generated. Never hashed.
pub const GENERATED_AT_KEY: &str = "generated_at";

pub const CONFIG_FILE: &str = "config.json";
pub const ERROR_FILE: &str = "error.log";
pub const RUN_LOCK: &str = "run";

/// Control flags accepted by every driver.
///
/// Flatten into the driver's own parser with `#[command(flatten)]` and keep
/// it out of the serialized arguments with `#[serde(skip)]`.
#[derive(Args, Debug, Clone, Default)]
pub struct ExpArgs {
    /// JSON mapping merged over the parsed arguments
    #[arg(id = "exp_config", long = "exp-config", value_name = "JSON", value_parser = parse_params, default_value = "{}")]
    pub config: Params,

    /// Print the run directory and exit
    #[arg(long = "exp-dir")]
    pub print_dir: bool,

    /// Print the fingerprint and exit
    #[arg(long = "exp-hash")]
    pub print_hash: bool,

    /// Print whether the run is complete and exit
    #[arg(long = "exp-is-complete")]
    pub print_complete: bool,

    /// Run even if a completed run exists
    #[arg(long = "exp-force")]
    pub force: bool,

    /// Give up instead of waiting when another process holds the run
    #[arg(long = "exp-no-wait")]
    pub no_wait: bool,
}

impl ExpArgs {
    /// The query requested on the command line, if any.
    /// Fingerprint wins over directory, directory over completion.
    pub fn query(&self) -> Option<Query> {
        if self.print_hash {
            Some(Query::Fingerprint)
        } else if self.print_dir {
            Some(Query::Directory)
        } else if self.print_complete {
            Some(Query::Completion)
        } else {
            None
        }
    }
}

fn parse_params(s: &str) -> Result<Params, String> {
    Params::from_json_str(s).map_err(|e| e.to_string())
}

/// Query-only modes of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Fingerprint,
    Directory,
    Completion,
}

impl Query {
    pub fn flag(self) -> &'static str {
        match self {
            Query::Fingerprint => HASH_FLAG,
            Query::Directory => DIR_FLAG,
            Query::Completion => IS_COMPLETE_FLAG,
        }
    }

    /// Interpret one line printed by a driver answering this query
    pub fn parse_answer(self, line: &str) -> Option<QueryAnswer> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match self {
            Query::Fingerprint => {
                let fingerprint = Fingerprint::from_raw(line);
                fingerprint
                    .is_well_formed()
                    .then_some(QueryAnswer::Fingerprint(fingerprint))
            }
            Query::Directory => Some(QueryAnswer::Directory(PathBuf::from(line))),
            Query::Completion => match line.to_ascii_lowercase().as_str() {
                "true" => Some(QueryAnswer::Completion(true)),
                "false" => Some(QueryAnswer::Completion(false)),
                _ => None,
            },
        }
    }
}

impl FromStr for Query {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hash" | "fingerprint" => Ok(Query::Fingerprint),
            "dir" | "directory" => Ok(Query::Directory),
            "complete" | "completion" | "is-complete" => Ok(Query::Completion),
            other => Err(format!(
                "unknown query '{}', expected one of: hash, dir, complete",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAnswer {
    Fingerprint(Fingerprint),
    Directory(PathBuf),
    Completion(bool),
}

/// Printed form, one line, as read back by the probe protocol
impl fmt::Display for QueryAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryAnswer::Fingerprint(fp) => write!(f, "{}", fp),
            QueryAnswer::Directory(dir) => write!(f, "{}", dir.display()),
            QueryAnswer::Completion(done) => write!(f, "{}", done),
        }
    }
}

/// Resolved parameter views of one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    /// Defaults, parsed inputs and override merged
    pub all: Params,
    /// Handed to the payload
    pub user: Params,
    /// Written to `config.json`
    pub config: Params,
    /// Fingerprinted
    pub hash: Params,
    pub fingerprint: Fingerprint,
}

/// Merge the argument sources and split them into their views
pub fn resolve_params(
    defaults: &Params,
    parsed: &Params,
    override_params: &Params,
    hash_ignore: &[String],
) -> ResolvedParams {
    let all = defaults.merge(parsed).merge(override_params);
    let config = all.without_keys(CONTROL_KEYS);
    let user = config.without_keys([EXECUTABLE_KEY, GENERATED_AT_KEY]);
    let hash = config
        .without_keys([GENERATED_AT_KEY])
        .without_keys(hash_ignore);
    let fingerprint = hash.fingerprint();

    ResolvedParams {
        all,
        user,
        config,
        hash,
        fingerprint,
    }
}

/// What the driver should do after [`Setup::enter`]
#[derive(Debug)]
pub enum Outcome {
    /// A completed run exists; skip the payload
    Hit { dir: PathBuf },
    /// A query flag was given; print the answer and stop
    Query(QueryAnswer),
    /// `--exp-no-wait` was given and another process holds the run
    Busy { dir: PathBuf },
    /// Run the payload, then report through the handle
    Proceed(RunHandle),
}

/// Entry point used by driver executables
pub struct Setup {
    project: Project,
    hash_ignore: Vec<String>,
    executable: Option<String>,
}

impl Setup {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            hash_ignore: Vec::new(),
            executable: None,
        }
    }

    /// Set up against the project discovered for this process
    pub fn discover() -> Result<Self> {
        Ok(Self::new(Project::discover()?))
    }

    /// Parameters that never affect the fingerprint (e.g. a thread count)
    pub fn hash_ignore<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hash_ignore.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Override the executable identity (defaults to the running binary)
    pub fn executable(mut self, identity: impl Into<String>) -> Self {
        self.executable = Some(identity.into());
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    fn executable_identity(&self) -> Result<String> {
        if let Some(identity) = &self.executable {
            return Ok(identity.clone());
        }
        match std::env::current_exe() {
            Ok(exe) => self.project.executable_identity(&exe),
            Err(_) => Ok(std::env::args().next().unwrap_or_default()),
        }
    }

    fn defaults(&self) -> Result<Params> {
        let mut defaults = Params::new();
        defaults.insert(EXECUTABLE_KEY, self.executable_identity()?);
        defaults.insert(GENERATED_AT_KEY, chrono::Utc::now().to_rfc3339());
        Ok(defaults)
    }

    fn ignore_list(&self) -> Vec<String> {
        let mut ignore = self.project.config().hash.ignore.clone();
        for key in &self.hash_ignore {
            if !ignore.contains(key) {
                ignore.push(key.clone());
            }
        }
        ignore
    }

    /// Resolve the parameter views for `parsed` and the flags in `exp`
    pub fn resolve(&self, parsed: &Params, exp: &ExpArgs) -> Result<ResolvedParams> {
        Ok(resolve_params(
            &self.defaults()?,
            parsed,
            &exp.config,
            &self.ignore_list(),
        ))
    }

    /// Decide what this invocation does.
    ///
    /// Assigns (or finds) the run directory, persists the config record and
    /// answers queries without touching the run lock. Otherwise takes the
    /// run lock and re-checks completion under it.
    pub fn enter(&self, parsed: &Params, exp: &ExpArgs) -> Result<Outcome> {
        let resolved = self.resolve(parsed, exp)?;
        let fingerprint = resolved.fingerprint.clone();
        let cache = CacheStore::open(&self.project)?;

        let (dir, created) = cache.get_or_assign_dir(&fingerprint)?;
        let lookup = if created { status::MISS } else { status::HIT };
        info!(
            operation = operations::ENTER,
            status = lookup,
            fingerprint = %fingerprint,
            dir = %dir.display(),
            "run directory resolved"
        );

        self.reconcile(&cache, &exp.config, &fingerprint)?;

        fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("Failed to create {}", dir.display()), e))?;
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() || exp.force {
            write_json_atomic(&config_path, &resolved.config, true)?;
        }

        if let Some(query) = exp.query() {
            let answer = match query {
                Query::Fingerprint => QueryAnswer::Fingerprint(fingerprint),
                Query::Directory => QueryAnswer::Directory(dir),
                Query::Completion => QueryAnswer::Completion(cache.is_complete(&fingerprint)?),
            };
            info!(operation = operations::QUERY, answer = %answer, "query answered");
            return Ok(Outcome::Query(answer));
        }

        let lock = RwFileLock::new(&dir, RUN_LOCK);
        let guard = if exp.no_wait {
            match lock.try_write() {
                Ok(guard) => guard,
                Err(Error::LockBusy { .. }) => {
                    info!(
                        operation = operations::ENTER,
                        status = status::BUSY,
                        dir = %dir.display(),
                        "run held by another process"
                    );
                    return Ok(Outcome::Busy { dir });
                }
                Err(e) => return Err(e),
            }
        } else {
            lock.write()?
        };

        let error_path = dir.join(ERROR_FILE);
        if error_path.exists() {
            fs::remove_file(&error_path).map_err(|e| {
                Error::io(format!("Failed to remove {}", error_path.display()), e)
            })?;
        }

        if cache.is_complete(&fingerprint)? && !exp.force {
            guard.release()?;
            info!(
                operation = operations::ENTER,
                status = status::HIT,
                dir = %dir.display(),
                "using cached data"
            );
            return Ok(Outcome::Hit { dir });
        }

        Ok(Outcome::Proceed(RunHandle {
            cache,
            fingerprint,
            dir,
            params: resolved.user,
            guard: Some(guard),
            finished: false,
        }))
    }

    /// Alias the override's own fingerprint to the resolved one, so a caller
    /// that only knows the override can find this run later
    fn reconcile(
        &self,
        cache: &CacheStore,
        override_params: &Params,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        if override_params.is_empty() {
            return Ok(());
        }

        let local = override_params.fingerprint();
        if local == *fingerprint || cache.exists(&local)? {
            return Ok(());
        }

        match cache.merge_hashes(&local, fingerprint) {
            Err(Error::AliasConflict { .. }) => {
                warn!(fingerprint = %local, "override fingerprint claimed concurrently, not aliased");
                Ok(())
            }
            other => other,
        }
    }

    /// Drive one invocation end to end.
    ///
    /// The payload receives the run directory and the user-visible
    /// parameters, and only runs when [`Setup::enter`] says so.
    pub fn run<F, T>(&self, parsed: &Params, exp: &ExpArgs, payload: F) -> Result<RunReport<T>>
    where
        F: FnOnce(&Path, &Params) -> anyhow::Result<T>,
    {
        match self.enter(parsed, exp)? {
            Outcome::Hit { dir } => Ok(RunReport::Cached { dir }),
            Outcome::Query(answer) => Ok(RunReport::Answered(answer)),
            Outcome::Busy { dir } => Ok(RunReport::Busy { dir }),
            Outcome::Proceed(handle) => {
                let result = payload(handle.dir(), handle.params());
                let dir = handle.dir().to_path_buf();
                let value = handle.finish(result)?;
                Ok(RunReport::Completed { dir, value })
            }
        }
    }
}

/// Result of [`Setup::run`]
#[derive(Debug)]
pub enum RunReport<T> {
    Completed { dir: PathBuf, value: T },
    Cached { dir: PathBuf },
    Answered(QueryAnswer),
    Busy { dir: PathBuf },
}

impl<T> RunReport<T> {
    pub fn dir(&self) -> Option<&Path> {
        match self {
            RunReport::Completed { dir, .. }
            | RunReport::Cached { dir }
            | RunReport::Busy { dir } => Some(dir),
            RunReport::Answered(_) => None,
        }
    }

    /// Print what the invoking process expects to see: the answer line on
    /// stdout for queries, a short notice on stderr otherwise
    pub fn emit(&self) {
        match self {
            RunReport::Answered(answer) => println!("{}", answer),
            RunReport::Cached { dir } => eprintln!("*** Using cached data on {}", dir.display()),
            RunReport::Busy { dir } => eprintln!("*** Run in {} is busy, not waiting", dir.display()),
            RunReport::Completed { .. } => {}
        }
    }
}

/// Exclusive claim on one run, returned by [`Setup::enter`].
///
/// Report the payload's result with [`RunHandle::finish`]. A handle dropped
/// without finishing (e.g. during a panic) records an error and leaves the
/// run incomplete.
#[derive(Debug)]
pub struct RunHandle {
    cache: CacheStore,
    fingerprint: Fingerprint,
    dir: PathBuf,
    params: Params,
    guard: Option<LockGuard>,
    finished: bool,
}

impl RunHandle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// User-visible parameters
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Mark the run complete and release it
    pub fn complete(mut self) -> Result<()> {
        self.finished = true;
        if let Err(e) = self.cache.set_complete(&self.fingerprint) {
            if let Err(written) = self.write_error(&format!("failed to record completion: {}\n", e)) {
                warn!(dir = %self.dir.display(), error = %written, "failed to record completion error");
            }
            return self.release().and(Err(e));
        }
        info!(
            operation = operations::RUN,
            status = status::SUCCESS,
            dir = %self.dir.display(),
            "run complete"
        );
        self.release()
    }

    /// Record `error` in the run directory and release the run, leaving it
    /// incomplete
    pub fn fail(mut self, error: &anyhow::Error) -> Result<()> {
        self.finished = true;
        warn!(
            operation = operations::RUN,
            status = status::ERROR,
            dir = %self.dir.display(),
            error = %format!("{:#}", error),
            "run failed"
        );
        let written = self.write_error(&format!("{:?}\n", error));
        let released = self.release();
        written.and(released)
    }

    /// Complete on `Ok`, fail on `Err`. Failures surface as `PayloadFailure`.
    pub fn finish<T>(self, result: anyhow::Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.complete()?;
                Ok(value)
            }
            Err(error) => {
                let dir = self.dir.clone();
                self.fail(&error)?;
                Err(Error::PayloadFailure {
                    dir,
                    message: format!("{:#}", error),
                })
            }
        }
    }

    fn write_error(&self, detail: &str) -> Result<()> {
        let path = self.dir.join(ERROR_FILE);
        fs::write(&path, detail)
            .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))
    }

    fn release(&mut self) -> Result<()> {
        match self.guard.take() {
            Some(guard) => guard.release(),
            None => Ok(()),
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let reason = if std::thread::panicking() {
            "payload panicked before the run finished\n"
        } else {
            "run handle dropped before the run finished\n"
        };
        if let Err(e) = self.write_error(reason) {
            warn!(dir = %self.dir.display(), error = %e, "failed to record abandoned run");
        }
    }
}
