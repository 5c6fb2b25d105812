//! The persistent context document bridging stateless assistant runs.
//!
//! One `local-context.md` per working directory, shared by every actor in
//! that directory. The server creates, clears, and truncates the document;
//! the assistant appends to it. Appended content is never parsed or
//! trusted beyond counting lines.

use std::io;
use std::path::Path;
use std::path::PathBuf;

use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::warn;

use crate::error::ContextStorageError;

/// Fixed filename inside the working directory.
pub const CONTEXT_FILENAME: &str = "local-context.md";

/// First lines of every document, preserved verbatim across truncations.
const HEADER_LINES: usize = 4;

/// How far below the cap a truncation lands, so the next few appends do
/// not immediately re-truncate.
const TRUNCATE_MARGIN: usize = 10;

pub const DEFAULT_LINE_CAP: usize = 1000;

/// What [`ContextStore::ensure`] did to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub created: bool,
    pub truncated: bool,
    /// Human-readable truncation summary, to be prefixed onto the next
    /// execution result's output.
    pub warning: Option<String>,
}

pub struct ContextStore {
    line_cap: usize,
}

impl ContextStore {
    pub fn new(line_cap: usize) -> Self {
        Self { line_cap }
    }

    /// Deterministic join; the document never escapes the directory.
    pub fn document_path(directory: &Path) -> PathBuf {
        directory.join(CONTEXT_FILENAME)
    }

    /// Create the document if absent; truncate it if it grew past the cap.
    pub async fn ensure(&self, directory: &Path) -> Result<EnsureOutcome, ContextStorageError> {
        let path = Self::document_path(directory);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::write(&path, header("Created")?).await?;
                return Ok(EnsureOutcome {
                    created: true,
                    truncated: false,
                    warning: None,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().collect();
        if lines.len() <= self.line_cap {
            return Ok(EnsureOutcome {
                created: false,
                truncated: false,
                warning: None,
            });
        }

        // Keep the fixed header plus the most recent lines, landing a
        // margin below the cap.
        let tail_keep = self.line_cap.saturating_sub(TRUNCATE_MARGIN);
        let tail_start = lines.len().saturating_sub(tail_keep).max(HEADER_LINES);
        let mut kept: Vec<&str> = Vec::with_capacity(HEADER_LINES + tail_keep);
        kept.extend_from_slice(&lines[..HEADER_LINES.min(lines.len())]);
        kept.extend_from_slice(&lines[tail_start..]);

        let mut rewritten = kept.join("\n");
        rewritten.push('\n');
        tokio::fs::write(&path, rewritten).await?;

        let message = format!(
            "Context document truncated from {} to {} lines; older entries were dropped.",
            lines.len(),
            kept.len()
        );
        warn!("{} for {}", message, directory.display());
        Ok(EnsureOutcome {
            created: false,
            truncated: true,
            warning: Some(message),
        })
    }

    /// Delete the document if present and write a fresh header. Idempotent;
    /// a missing document is not an error.
    pub async fn reset(&self, directory: &Path) -> Result<(), ContextStorageError> {
        let path = Self::document_path(directory);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::write(&path, header("Reset")?).await?;
        Ok(())
    }
}

/// The fixed 4-line document header.
fn header(label: &str) -> Result<String, ContextStorageError> {
    let timestamp_format: &[FormatItem] =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    let timestamp = OffsetDateTime::now_utc()
        .format(timestamp_format)
        .map_err(|e| {
            ContextStorageError(io::Error::other(format!("failed to format timestamp: {e}")))
        })?;
    Ok(format!("# Project Context\n\n{label}: {timestamp}\n\n"))
}
