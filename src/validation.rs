use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, SbvError};

const COMPANION_LOG_EXTENSION: &str = "log";
const SUPPORTED_BACKUP_EXTENSION: &str = "xml";

fn user_id_pattern() -> std::result::Result<&'static Regex, SbvError> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$"))
        .as_ref()
        .map_err(|e| SbvError::InvalidConfig(format!("user id pattern: {e}")))
}

/// Validation utilities for identifiers and dropped files
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// User ids become path components, so only a safe alphabet is accepted
    pub fn validate_user_id(user_id: &str) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(SbvError::InvalidUserId("user id cannot be empty".to_string()));
        }

        if !user_id_pattern()?.is_match(user_id) {
            return Err(SbvError::InvalidUserId(format!(
                "{user_id:?} must be 1-128 characters of letters, digits, '.', '-' or '_'"
            )));
        }

        if user_id.contains("..") {
            return Err(SbvError::InvalidUserId(format!(
                "{user_id:?} contains a parent directory reference"
            )));
        }

        Ok(())
    }

    /// Hidden files and companion logs are never import candidates
    #[must_use]
    pub fn is_import_candidate(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        !has_extension(path, COMPANION_LOG_EXTENSION)
    }

    /// Only XML backups can be parsed
    #[must_use]
    pub fn is_supported_backup(path: &Path) -> bool {
        has_extension(path, SUPPORTED_BACKUP_EXTENSION)
    }

    /// Strip control characters from text destined for log files
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\t')
            .collect::<String>()
            .trim()
            .to_string()
    }
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}
