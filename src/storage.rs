/// Blob persistence helpers shared by the metadata and cache stores
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// reader without the lock still never observes a torn file.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::thread;

use crate::error::{Error, Result};

/// Write `data` to `path` atomically
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|e| Error::io(format!("Failed to create {}", parent.display()), e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "blob".to_string());

    // PID + thread ID keeps concurrent writers off each other's temp file
    let temp_path = parent.join(format!(
        ".{}.tmp.{}.{:?}",
        file_name,
        std::process::id(),
        thread::current().id()
    ));

    let mut file = fs::File::create(&temp_path)
        .map_err(|e| Error::io(format!("Failed to create {}", temp_path.display()), e))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|e| Error::io(format!("Failed to write {}", temp_path.display()), e))?;
    fs::rename(&temp_path, path)
        .map_err(|e| Error::io(format!("Failed to replace {}", path.display()), e))?;

    Ok(())
}

/// Serialize `value` as JSON and write it atomically
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    let bytes = if pretty {
        serde_json::to_vec_pretty(value)
    } else {
        serde_json::to_vec(value)
    }
    .map_err(|e| Error::json(format!("Failed to serialize {}", path.display()), e))?;

    write_atomic(path, &bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read(path)
        .map_err(|e| Error::io(format!("Failed to read {}", path.display()), e))?;
    serde_json::from_slice(&content)
        .map_err(|e| Error::json(format!("Failed to parse {}", path.display()), e))
}
