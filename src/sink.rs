//! Record Sink: where flattened conversation rows go.
//!
//! [`CsvSink`] appends to a CSV file. The header is written only when the file
//! is new or empty, so repeated runs keep adding rows under a single header.
//! Each row is flushed before `append` returns.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::export::record::ConversationRecord;

/// Errors writing output rows.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Opening or flushing the output file failed.
    #[error("output file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serializing a row failed.
    #[error("writing row to {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Destination for output rows.
pub trait RecordSink {
    /// Appends one row. Returns once the row is durable enough to mark the
    /// item done.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the row could not be written.
    fn append(&mut self, record: &ConversationRecord) -> Result<(), SinkError>;
}

/// Appending CSV writer.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl fmt::Debug for CsvSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvSink").field("path", &self.path).finish_non_exhaustive()
    }
}

impl CsvSink {
    /// Opens `path` for appending, creating it and its parent directory.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let io_err = |source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(io_err)?;
        let needs_header = file.metadata().map_err(io_err)?.len() == 0;
        if needs_header {
            info!(path = %path.display(), "creating output table");
        }

        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, record: &ConversationRecord) -> Result<(), SinkError> {
        self.writer
            .serialize(record)
            .map_err(|source| SinkError::Csv {
                path: self.path.clone(),
                source,
            })?;
        self.writer.flush().map_err(|source| SinkError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(conversation_id = %record.id, "row appended");
        Ok(())
    }
}
