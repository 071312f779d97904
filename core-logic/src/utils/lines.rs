use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::error::ConfigError;

/// Reads a line-delimited list, trimming entries and skipping blank lines.
pub fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read list file: {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Like [`read_lines`], but a missing file yields an empty list.
pub fn read_lines_optional(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    if !path.exists() {
        warn!("{} not found. Continuing with an empty list.", path.display());
        return Ok(Vec::new());
    }
    read_lines(path)
}
