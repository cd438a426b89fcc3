//! Project root discovery and path layout.
//!
//! A project is any directory containing the `.exp` marker directory. The
//! [`Project`] value is the per-process context every store is opened from;
//! it is discovered once and passed around explicitly.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::XlabConfig;
use crate::error::{Error, Result};

/// Marker directory identifying a project root
pub const MARKER_DIR: &str = ".exp";

/// Environment variable pinning the project root
pub const ROOT_ENV: &str = "XLAB_ROOT";

/// Walk up from `start` until a directory containing the marker is found
pub fn find_root(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);

    while let Some(dir) = current {
        if dir.join(MARKER_DIR).is_dir() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }

    None
}

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    config: XlabConfig,
}

impl Project {
    /// Create the marker directory under `root` (idempotent) and open the project
    pub fn init(root: &Path) -> Result<Self> {
        let exp = root.join(MARKER_DIR);
        fs::create_dir_all(&exp)
            .map_err(|e| Error::io(format!("Failed to create {}", exp.display()), e))?;
        Self::open(root)
    }

    /// Open a project whose root is exactly `root`
    pub fn open(root: &Path) -> Result<Self> {
        let root = absolute(root)?;
        let exp = root.join(MARKER_DIR);
        if !exp.is_dir() {
            return Err(Error::ProjectNotFound { start: root });
        }

        let config = XlabConfig::load(&exp)?;
        Ok(Self { root, config })
    }

    /// Open the nearest project at or above `start`
    pub fn discover_from(start: &Path) -> Result<Self> {
        let start = absolute(start)?;
        match find_root(&start) {
            Some(root) => Self::open(&root),
            None => Err(Error::ProjectNotFound { start }),
        }
    }

    /// Locate the project for the running process.
    ///
    /// Tries `XLAB_ROOT`, then the directories above the running
    /// executable, then the directories above the working directory.
    pub fn discover() -> Result<Self> {
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            debug!(root = ?root, "project root pinned by {}", ROOT_ENV);
            return Self::open(Path::new(&root));
        }

        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        if let Some(root) = exe_dir.as_deref().and_then(find_root) {
            debug!(root = %root.display(), "project root found above executable");
            return Self::open(&root);
        }

        let cwd = std::env::current_dir()
            .map_err(|e| Error::io("Failed to get current directory", e))?;
        Self::discover_from(&cwd)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &XlabConfig {
        &self.config
    }

    /// The marker directory holding the shared stores
    pub fn exp_path(&self) -> PathBuf {
        self.root.join(MARKER_DIR)
    }

    /// `path` relative to the project root.
    ///
    /// Fails with `PathOutsideProject` when `path` does not lie under the root.
    pub fn relative_to_root(&self, path: &Path) -> Result<PathBuf> {
        let root = normalize(&self.root)?;
        let path = normalize(path)?;

        path.strip_prefix(&root)
            .map(Path::to_path_buf)
            .map_err(|_| Error::PathOutsideProject { path, root })
    }

    /// How an executable is named in persisted parameters: project-relative
    /// when it lives inside the project, absolute otherwise
    pub fn executable_identity(&self, exe: &Path) -> Result<String> {
        let identity = match self.relative_to_root(exe) {
            Ok(relative) => relative,
            Err(Error::PathOutsideProject { path, .. }) => path,
            Err(e) => return Err(e),
        };
        Ok(identity.to_string_lossy().replace('\\', "/"))
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd =
        std::env::current_dir().map_err(|e| Error::io("Failed to get current directory", e))?;
    Ok(cwd.join(path))
}

/// Canonical form when the path exists, lexical absolute form otherwise
fn normalize(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(canonical) => Ok(canonical),
        Err(_) => absolute(path),
    }
}
