use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Fingerprint not found in cache: {fingerprint}")]
    NotFound { fingerprint: String },

    #[error("Invalid response from `{command}`: {reason}")]
    InvalidResponse { command: String, reason: String },

    #[error("Path does not belong to project. Received {path} which was expected to be found within {root}")]
    PathOutsideProject { path: PathBuf, root: PathBuf },

    #[error("Lock misuse on {name}: {detail}")]
    LockMisuse { name: String, detail: &'static str },

    #[error("Lock {name} is held by another process")]
    LockBusy { name: String },

    #[error("Run in {dir} failed: {message}")]
    PayloadFailure { dir: PathBuf, message: String },

    #[error("Could not find '.exp' folder above {start}. Try running 'xlab project init' on your project root directory")]
    ProjectNotFound { start: PathBuf },

    #[error("Fingerprint {new} already maps to {existing}, refusing to alias it to {target}")]
    AliasConflict {
        new: String,
        existing: String,
        target: String,
    },

    #[error("Cannot format command template `{template}`: {reason}")]
    Template { template: String, reason: String },

    #[error("Command `{command}` exited with status {code:?}")]
    ChildFailed { command: String, code: Option<i32> },

    #[error("Invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Json {
            context: context.into(),
            source,
        }
    }
}
