//! User-facing warnings embedded in build logs.
//!
//! The orchestrator emits them as log lines of the form
//! `<prefix> - user_warning - {"message": "..."}`.

use std::collections::BTreeSet;
use std::path::Path;

use serde_json::Value;

use super::USER_WARNINGS_FILENAME;
use crate::error::{Error, Result};

const MARKER: &str = " - user_warning - ";

/// De-duplicated set of user warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserWarnings {
    messages: BTreeSet<String>,
}

impl UserWarnings {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts the warning message from a log line, if it carries one.
    ///
    /// ```rust
    /// use kcb_builder::logs::UserWarnings;
    ///
    /// let line = r#"2024-01-01 - user_warning - {"message": "base image is deprecated"}"#;
    /// assert_eq!(
    ///     UserWarnings::parse_line(line).as_deref(),
    ///     Some("base image is deprecated")
    /// );
    /// assert_eq!(UserWarnings::parse_line("plain output"), None);
    /// ```
    #[must_use]
    pub fn parse_line(line: &str) -> Option<String> {
        let (prefix, payload) = line.rsplit_once(MARKER)?;
        if prefix.is_empty() {
            return None;
        }
        let value: Value = serde_json::from_str(payload).ok()?;
        value.get("message")?.as_str().map(str::to_string)
    }

    /// Records the warning carried by `line`. Returns true if it was one.
    pub fn capture(&mut self, line: &str) -> bool {
        match Self::parse_line(line) {
            Some(message) => {
                self.messages.insert(message);
                true
            }
            None => false,
        }
    }

    /// Returns true if no warning was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the number of distinct warnings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns the warnings in sorted order.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.messages.into_iter().collect()
    }

    /// Renders the warnings file content, one JSON string per line.
    ///
    /// Messages may span lines, so each one is stored escaped.
    #[must_use]
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|message| Value::String(message.clone()).to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Writes the warnings file into `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub async fn write_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(USER_WARNINGS_FILENAME);
        tokio::fs::write(&path, self.render())
            .await
            .map_err(|e| Error::io(&path, e))
    }

    /// Reads the warnings file from `dir`; a missing file means no warnings.
    pub async fn load(dir: &Path) -> Self {
        let path = dir.join(USER_WARNINGS_FILENAME);
        let content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        Self {
            messages: content
                .lines()
                .filter(|l| !l.is_empty())
                .map(decode_line)
                .collect(),
        }
    }
}

/// Decodes one stored warning; a line that is not a JSON string is kept as is.
fn decode_line(line: &str) -> String {
    serde_json::from_str::<String>(line).unwrap_or_else(|_| line.to_string())
}
