//! JSON files handed from one stage to the next. Each is the complete output
//! of its producer, so any stage can be rerun on its own.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body)?;
    info!(path = %path.display(), "artifact written");
    Ok(())
}

/// Read an artifact a stage cannot run without. A missing file is reported
/// with `hint` naming the stage that produces it.
pub fn read_required<T: DeserializeOwned>(path: &Path, hint: &str) -> Result<T> {
    if !path.exists() {
        return Err(AppError::MissingInput {
            path: path.to_path_buf(),
            hint: hint.to_string(),
        });
    }
    read(path)
}

/// Read an artifact that may legitimately not exist yet.
pub fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        warn!(path = %path.display(), "artifact not found, skipping");
        return Ok(None);
    }
    read(path).map(Some)
}

fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = fs::read(path)?;
    let value = serde_json::from_slice(&body)?;
    info!(path = %path.display(), "artifact loaded");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.json");
        write_json(&path, &vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = read_required(&path, "unused").unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn missing_required_names_the_precondition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markets_snapshot.json");
        let err = read_required::<Vec<i32>>(&path, "run `edge-finder discover` first").unwrap_err();
        assert!(matches!(err, AppError::MissingInput { .. }));
        assert!(err.to_string().contains("run `edge-finder discover` first"));
    }

    #[test]
    fn missing_optional_is_none_but_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live_prices.json");
        assert!(read_optional::<Vec<i32>>(&path).unwrap().is_none());

        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(read_optional::<Vec<i32>>(&path), Err(AppError::Json(_))));
    }
}
