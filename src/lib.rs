//! Local, file-system-backed memoization for experiment runs.
//!
//! A driver executable resolves its parameters and calls
//! [`Setup::enter`] (or [`Setup::run`]); the parameters are fingerprinted,
//! mapped to a numbered run directory under the project root, and the
//! payload runs at most once per fingerprint, even across processes.
//! Orchestrators talk to drivers through [`Experiment`].

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod lock;
pub mod logging;
pub mod metadata;
pub mod params;
pub mod probe;
pub mod project;
pub mod storage;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheStore};
pub use config::XlabConfig;
pub use coordinator::{ExpArgs, Outcome, Query, QueryAnswer, RunHandle, RunReport, Setup};
pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, Fingerprintable};
pub use lock::{LockGuard, RwFileLock};
pub use metadata::MetadataStore;
pub use params::Params;
pub use probe::{Experiment, RunOptions};
pub use project::Project;
