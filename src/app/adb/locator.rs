use std::path::{Path, PathBuf};

use crate::app::error::AppError;

/// Strip wrapping quotes copied in from shell snippets or Windows paths.
pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

/// An explicit config override wins, then a managed platform-tools install,
/// then whatever `adb` PATH resolution finds.
pub fn resolve_adb_program(config_command_path: &str, managed: Option<&PathBuf>) -> String {
    let normalized = normalize_command_path(config_command_path);
    if !normalized.is_empty() {
        return normalized;
    }
    if let Some(path) = managed {
        return path.to_string_lossy().to_string();
    }
    "adb".to_string()
}

pub fn validate_adb_program(program: &str, trace_id: &str) -> Result<(), AppError> {
    if program.trim().is_empty() {
        return Err(AppError::validation("ADB command is empty", trace_id));
    }
    if program == "adb" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(AppError::validation(
            "ADB path must point to an executable file",
            trace_id,
        ));
    }
    if !path.exists() {
        return Err(AppError::validation(
            "ADB executable not found at the configured path",
            trace_id,
        ));
    }
    Ok(())
}
