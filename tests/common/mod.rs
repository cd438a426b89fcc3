// Common test utilities shared across acceptance tests
//
// Every test works in its own temporary project. Child processes get
// XLAB_ROOT pinned to it, because the binaries under test live in the
// target directory and would otherwise not find the project.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use tempfile::TempDir;

pub const XLAB_BIN: &str = env!("CARGO_BIN_EXE_xlab");
pub const SAMPLER_BIN: &str = env!("CARGO_BIN_EXE_xlab-sampler");

/// Temporary project initialized with `xlab project init`
pub struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let project = Self::uninitialized();
        project.xlab().args(["project", "init"]).assert().success();
        project
    }

    /// Temporary directory without the `.exp` marker
    pub fn uninitialized() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn run_dir(&self, id: u64) -> PathBuf {
        self.root().join("runs").join(id.to_string())
    }

    pub fn xlab(&self) -> Command {
        let mut cmd = Command::new(XLAB_BIN);
        cmd.env("XLAB_ROOT", self.root())
            .env("XLAB_LOG_FORMAT", "compact")
            .current_dir(self.root());
        cmd
    }

    pub fn sampler(&self) -> Command {
        let mut cmd = Command::new(SAMPLER_BIN);
        cmd.env("XLAB_ROOT", self.root())
            .env("XLAB_LOG_FORMAT", "compact")
            .current_dir(self.root());
        cmd
    }

    /// Same as `sampler`, for spawning concurrent children
    pub fn sampler_process(&self) -> StdCommand {
        let mut cmd = StdCommand::new(SAMPLER_BIN);
        cmd.env("XLAB_ROOT", self.root())
            .env("XLAB_LOG_FORMAT", "compact")
            .current_dir(self.root());
        cmd
    }

    /// Number of times the sampler payload ran in this project
    pub fn sampler_calls(&self) -> u64 {
        self.test_data()
            .and_then(|data| data["sampler_calls"].as_u64())
            .unwrap_or(0)
    }

    pub fn test_data(&self) -> Option<Value> {
        let path = self.root().join("test_data.json");
        if !path.exists() {
            return None;
        }
        Some(serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap())
    }

    pub fn read_json(&self, path: impl AsRef<Path>) -> Value {
        serde_json::from_str(&fs::read_to_string(self.root().join(path)).unwrap()).unwrap()
    }

    /// Last non-empty stdout line of a successful command
    pub fn answer(&self, cmd: &mut Command) -> String {
        let output = cmd.assert().success().get_output().stdout.clone();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}
