use crate::domain::{ScalingError, ScalingResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

pub fn format_fixed_f64(value: f64, width: usize, precision: usize) -> String {
    format!(
        "{value:>width$.precision$}",
        width = width,
        precision = precision
    )
}

pub fn normalize_text_artifact(content: &str) -> String {
    let mut normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if !normalized.is_empty() && !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    normalized
}

pub fn write_text_artifact(path: &Path, content: &str) -> std::io::Result<()> {
    fs::write(path, normalize_text_artifact(content))
}

/// Pretty-printed JSON with a trailing newline.
pub fn write_json_artifact<T: Serialize>(path: &Path, value: &T) -> ScalingResult<()> {
    let content = serde_json::to_string_pretty(value).map_err(|source| {
        ScalingError::internal(
            "IO.JSON_ENCODE",
            format!("failed to encode '{}': {source}", path.display()),
        )
    })?;
    write_text_artifact(path, &content).map_err(|source| {
        ScalingError::io_system(
            "IO.WRITE",
            format!("failed to write '{}': {source}", path.display()),
        )
    })
}

/// Reads a JSON document. `what` names the document in error messages.
pub fn read_json_artifact<T: DeserializeOwned>(path: &Path, what: &str) -> ScalingResult<T> {
    let source = fs::read_to_string(path).map_err(|source| {
        ScalingError::io_system(
            "IO.READ",
            format!("failed to read {what} '{}': {source}", path.display()),
        )
    })?;
    serde_json::from_str(&source).map_err(|source| {
        ScalingError::configuration(
            "CONFIG.JSON_PARSE",
            format!("failed to parse {what} '{}': {source}", path.display()),
        )
    })
}
