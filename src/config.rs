use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path};

use crate::error::{Error, Result};

/// File name of the optional project configuration inside the marker directory
pub const CONFIG_FILE: &str = "config.toml";

/// Project configuration (loaded from `.exp/config.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct XlabConfig {
    #[serde(default)]
    pub runs: RunsConfig,

    #[serde(default)]
    pub hash: HashConfig,
}

/// Run directory layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunsConfig {
    /// Directory holding `<id>/` run directories, relative to the project root
    #[serde(default = "default_runs_dir")]
    pub dir: String,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            dir: default_runs_dir(),
        }
    }
}

/// Fingerprinting options
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HashConfig {
    /// Parameters never taken into account by any driver of this project
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_runs_dir() -> String {
    "runs".to_string()
}

impl XlabConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Failed to read config file: {}", path.display()), e))?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Load `<exp_dir>/config.toml`, falling back to defaults when absent
    pub fn load(exp_dir: &Path) -> Result<Self> {
        let path = exp_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let runs = Path::new(&self.runs.dir);
        let escapes = runs
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if self.runs.dir.trim().is_empty() || escapes {
            return Err(Error::Config {
                path: path.to_path_buf(),
                message: format!(
                    "runs.dir must be a relative path inside the project, got {:?}",
                    self.runs.dir
                ),
            });
        }
        Ok(())
    }

    /// Commented file written by `xlab project init`
    pub fn template() -> &'static str {
        r#"# xlab project configuration

[runs]
# Directory (relative to the project root) holding numbered run directories
dir = "runs"

[hash]
# Parameters that never affect results for any driver in this project,
# e.g. ["threads", "verbose"]
ignore = []
"#
    }
}
