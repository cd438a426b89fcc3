//! Orchestrator-side handle on a driver executable.
//!
//! An [`Experiment`] knows a driver only through a command template and a
//! subset of its parameters. It learns the driver's fingerprint, directory
//! and completion status by spawning it in query-only mode and reading the
//! last non-empty line of its standard output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::coordinator::{
    Query, QueryAnswer, CONFIG_FILE, CONFIG_FLAG, EXECUTABLE_KEY, FORCE_FLAG, GENERATED_AT_KEY,
    NO_WAIT_FLAG,
};
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, Fingerprintable};
use crate::logging::{operations, status};
use crate::params::Params;
use crate::project::{Project, ROOT_ENV};
use crate::storage::read_json;

/// Replace `{name}` placeholders with values from `values`.
///
/// Strings are inserted verbatim, anything else as JSON. `{{` and `}}`
/// produce literal braces.
pub fn format_command(template: &str, values: &Params) -> Result<String> {
    let error = |reason: String| Error::Template {
        template: template.to_string(),
        reason,
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(error("unclosed placeholder".to_string())),
                    }
                }
                match values.get(name.trim()) {
                    Some(serde_json::Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => return Err(error(format!("no value for placeholder {{{}}}", name))),
                }
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(error("unmatched '}'".to_string())),
            c => out.push(c),
        }
    }

    Ok(out)
}

/// Interpret a finished query child.
///
/// The answer is the last non-empty line of standard output. Without one,
/// a non-empty standard error becomes the failure reason.
pub fn read_answer(query: Query, command: &str, output: &Output) -> Result<QueryAnswer> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let answer = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| query.parse_answer(line));

    if let Some(answer) = answer {
        return Ok(answer);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let reason = if stderr.trim().is_empty() {
        match output.status.code() {
            Some(0) | None => "command did not print an answer".to_string(),
            Some(code) => format!("command exited with status {} without an answer", code),
        }
    } else {
        stderr.trim().to_string()
    };

    Err(Error::InvalidResponse {
        command: command.to_string(),
        reason,
    })
}

/// Run `argv` once in query-only mode with `override_params` as its
/// embedded configuration
pub fn probe(
    project: &Project,
    argv: &[String],
    override_params: &Params,
    query: Query,
) -> Result<QueryAnswer> {
    query_child(project, argv, override_params, query).map(|(answer, _)| answer)
}

/// Answer of one query child, along with its trimmed standard error
fn query_child(
    project: &Project,
    argv: &[String],
    override_params: &Params,
    query: Query,
) -> Result<(QueryAnswer, String)> {
    let mut command = build_command(project, argv)?;
    command
        .arg(query.flag())
        .arg(CONFIG_FLAG)
        .arg(override_params.to_json_string())
        .stdin(Stdio::null());

    let shown = display_command(argv);
    debug!(operation = operations::PROBE, command = %shown, query = ?query, "spawning probe");

    let output = command
        .output()
        .map_err(|e| Error::io(format!("Failed to spawn `{}`", shown), e))?;

    let answer = read_answer(query, &shown, &output)?;
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Ok((answer, stderr))
}

fn build_command(project: &Project, argv: &[String]) -> Result<Command> {
    let Some((program, args)) = argv.split_first() else {
        return Err(Error::InvalidResponse {
            command: String::new(),
            reason: "empty command".to_string(),
        });
    };

    let mut command = Command::new(resolve_program(project, program));
    command
        .args(args)
        .env(ROOT_ENV, project.root())
        .current_dir(project.root());
    Ok(command)
}

/// Paths with a separator are taken relative to the project root, bare
/// names are looked up on `PATH`
fn resolve_program(project: &Project, program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.components().count() > 1 {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        return project.root().join(path);
    }

    which::which(program).unwrap_or_else(|e| {
        debug!(program = %program, error = %e, "not found on PATH, trying as-is");
        PathBuf::from(program)
    })
}

fn display_command(argv: &[String]) -> String {
    argv.join(" ")
}

/// How to invoke a driver for real
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Reuse a completed run instead of forcing a new one
    pub use_cached: bool,
    /// Wait for another process holding the run instead of giving up
    pub wait: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            use_cached: true,
            wait: true,
        }
    }
}

#[derive(Debug)]
pub struct Experiment {
    project: Project,
    executable: String,
    command: String,
    args: Params,
    last_local: Option<Fingerprint>,
    last_full: Option<Fingerprint>,
}

impl Experiment {
    /// Handle on the driver `executable`, started through `command` (e.g.
    /// `"{executable} {op}"`).
    ///
    /// Probes the driver for its directory and replaces `args` with the
    /// fully defaulted parameters persisted there.
    pub fn new(
        project: Project,
        executable: impl Into<String>,
        command: impl Into<String>,
        args: Params,
    ) -> Result<Self> {
        let mut experiment = Self::detached(project, executable, command, args);
        let dir = experiment.dir()?;

        let config: Params = read_json(&dir.join(CONFIG_FILE))?;
        experiment.args = config.without_keys([EXECUTABLE_KEY, GENERATED_AT_KEY]);
        experiment.last_local = Some(experiment.args.fingerprint());

        Ok(experiment)
    }

    /// Handle that has not talked to the driver yet
    pub fn detached(
        project: Project,
        executable: impl Into<String>,
        command: impl Into<String>,
        args: Params,
    ) -> Self {
        Self {
            project,
            executable: executable.into(),
            command: command.into(),
            args,
            last_local: None,
            last_full: None,
        }
    }

    pub fn args(&self) -> &Params {
        &self.args
    }

    /// Changing the arguments invalidates the remembered fingerprint
    pub fn args_mut(&mut self) -> &mut Params {
        &mut self.args
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// The formatted command, split on whitespace
    pub fn command_line(&self) -> Result<Vec<String>> {
        let mut values = Params::new();
        values.insert(EXECUTABLE_KEY, self.executable.clone());
        let values = values.merge(&self.args);

        let formatted = format_command(&self.command, &values)?;
        Ok(formatted.split_whitespace().map(str::to_string).collect())
    }

    /// Ask the driver one query
    pub fn probe(&self, query: Query) -> Result<QueryAnswer> {
        probe(&self.project, &self.command_line()?, &self.args, query)
    }

    /// Fingerprint of the driver's run for the current arguments.
    ///
    /// Reuses the last probe while the arguments are unchanged, and skips
    /// the probe entirely when the cache already knows the arguments'
    /// own fingerprint.
    pub fn fingerprint(&mut self) -> Result<Fingerprint> {
        let local = self.args.fingerprint();
        if self.last_local.as_ref() == Some(&local) {
            if let Some(full) = &self.last_full {
                return Ok(full.clone());
            }
        }

        let cache = CacheStore::open(&self.project)?;
        if cache.exists(&local)? {
            debug!(fingerprint = %local, "local fingerprint already cached");
            self.last_local = Some(local.clone());
            self.last_full = Some(local.clone());
            return Ok(local);
        }

        let command = self.command_line()?;
        let (answer, stderr) = query_child(&self.project, &command, &self.args, Query::Fingerprint)?;
        let full = match answer {
            QueryAnswer::Fingerprint(full) => full,
            other => {
                return Err(Error::InvalidResponse {
                    command: display_command(&command),
                    reason: format!("expected a fingerprint, got {}", other),
                })
            }
        };

        if !cache.exists(&full)? {
            return Err(Error::InvalidResponse {
                command: display_command(&command),
                reason: if stderr.is_empty() {
                    format!("returned unknown fingerprint {}", full)
                } else {
                    stderr
                },
            });
        }

        info!(
            operation = operations::PROBE,
            status = status::SUCCESS,
            fingerprint = %full,
            "driver fingerprint resolved"
        );
        self.last_local = Some(local);
        self.last_full = Some(full.clone());
        Ok(full)
    }

    pub fn dir(&mut self) -> Result<PathBuf> {
        let fingerprint = self.fingerprint()?;
        CacheStore::open(&self.project)?.get_dir(&fingerprint)
    }

    pub fn is_complete(&mut self) -> Result<bool> {
        let fingerprint = self.fingerprint()?;
        CacheStore::open(&self.project)?.is_complete(&fingerprint)
    }

    /// Run the driver with inherited standard streams and wait for it
    pub fn run(&self, options: RunOptions) -> Result<()> {
        let argv = self.command_line()?;
        let mut command = build_command(&self.project, &argv)?;
        if !options.use_cached {
            command.arg(FORCE_FLAG);
        }
        if !options.wait {
            command.arg(NO_WAIT_FLAG);
        }
        command.arg(CONFIG_FLAG).arg(self.args.to_json_string());

        let shown = display_command(&argv);
        info!(operation = operations::RUN, command = %shown, "running driver");

        let exit = command
            .status()
            .map_err(|e| Error::io(format!("Failed to spawn `{}`", shown), e))?;

        if !exit.success() {
            return Err(Error::ChildFailed {
                command: shown,
                code: exit.code(),
            });
        }
        Ok(())
    }
}
