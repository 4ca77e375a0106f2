//! Session recorder: one plain-text artifact per answered turn.
//!
//! Artifacts are named by the turn timestamp (`YYYY-MM-DD-HH-MM-SS`) and are
//! never overwritten. Once the directory holds `max_records` files, further
//! records are skipped. The check is advisory; concurrent turns may overshoot.

use crate::config::RecorderConfig;
use crate::context::CONTEXT_DELIMITER;
use crate::error::RecorderError;
use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// `strftime` pattern for artifact names and feedback links.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Suffixes tried when a name is already taken within the same second.
const MAX_NAME_ATTEMPTS: usize = 100;

pub fn format_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Everything persisted about one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub timestamp: DateTime<Local>,
    pub original_query: String,
    /// Every query sent to the index, original last. Empty when the turn
    /// skipped retrieval.
    pub augmented_queries: Vec<String>,
    pub retrieved_context: String,
    pub answer: String,
}

impl SessionRecord {
    /// Artifact base name.
    pub fn stem(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    /// Artifact body: query, answer, queries and documents, delimited.
    pub fn render(&self) -> String {
        let delimiter = CONTEXT_DELIMITER;
        format!(
            "Query:\n{query}{delimiter}Response:\n\n{answer}{delimiter}Augmented questions:\n\n{queries}{delimiter}Retrieved documents:{context}",
            query = self.original_query,
            answer = self.answer,
            queries = self.augmented_queries.join("\n"),
            context = self.retrieved_context,
        )
    }
}

/// Writes [`SessionRecord`]s into a directory.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    directory: PathBuf,
    max_records: usize,
}

impl SessionRecorder {
    pub fn new(directory: impl Into<PathBuf>, max_records: usize) -> Self {
        Self {
            directory: directory.into(),
            max_records,
        }
    }

    /// `None` when recording is disabled.
    pub fn from_config(config: &RecorderConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(&config.directory, config.max_records))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Persist `record`.
    ///
    /// Returns the artifact path, or `None` when the cap was already reached.
    pub async fn record(&self, record: &SessionRecord) -> Result<Option<PathBuf>, RecorderError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| self.directory_error(e))?;

        let existing = self.count_artifacts().await?;
        if existing >= self.max_records {
            debug!(
                existing,
                max = self.max_records,
                "Session log cap reached; not recording"
            );
            return Ok(None);
        }

        let stem = record.stem();
        let (path, mut file) = self.create_unique(&stem).await?;
        let write_err = |e: std::io::Error| RecorderError::Write {
            path: path.clone(),
            message: e.to_string(),
        };
        file.write_all(record.render().as_bytes())
            .await
            .map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
        debug!(path = %path.display(), "Session recorded");
        Ok(Some(path))
    }

    /// Like [`record`](Self::record) but only logs failures.
    pub async fn record_best_effort(&self, record: &SessionRecord) -> Option<PathBuf> {
        match self.record(record).await {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Failed to record session");
                None
            }
        }
    }

    async fn count_artifacts(&self) -> Result<usize, RecorderError> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| self.directory_error(e))?;
        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.directory_error(e))?
        {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Exclusively create `stem`, or `stem-1`, `stem-2`, ... if taken.
    async fn create_unique(&self, stem: &str) -> Result<(PathBuf, tokio::fs::File), RecorderError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                stem.to_string()
            } else {
                format!("{stem}-{attempt}")
            };
            let path = self.directory.join(name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(RecorderError::Write {
                        path,
                        message: e.to_string(),
                    });
                }
            }
        }
        Err(RecorderError::NameExhausted {
            stem: stem.to_string(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    fn directory_error(&self, e: std::io::Error) -> RecorderError {
        RecorderError::Directory {
            path: self.directory.clone(),
            message: e.to_string(),
        }
    }
}
