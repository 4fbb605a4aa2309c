//! Progress Store: an immutable pending snapshot plus an append-only done log.
//!
//! Discovery writes the pending snapshot once (atomically, via a temp file and
//! rename). Processing never rewrites it; instead each finished identifier is
//! appended to the done log. Remaining work is the set difference computed at
//! load time, so a crash at any point loses nothing: the next run rebuilds the
//! same view from the two files.
//!
//! Both files are newline-delimited plain text. Blank lines and surrounding
//! whitespace are ignored when reading.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::api::models::ConversationId;
use crate::config::ExportPaths;

/// Errors reading or writing progress files. Always fatal to a run.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Processing was started before discovery produced a snapshot.
    #[error("pending snapshot {path} not found; run `discover` first")]
    MissingSnapshot {
        /// Expected snapshot path.
        path: PathBuf,
    },

    /// Reading or writing a progress file failed.
    #[error("progress file {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ProgressError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// In-memory view of persisted progress.
#[derive(Debug, Default, Clone)]
pub struct ProgressSnapshot {
    pending: Vec<ConversationId>,
    done: HashSet<ConversationId>,
}

impl ProgressSnapshot {
    /// Identifiers from the pending snapshot, in file order.
    #[must_use]
    pub fn pending(&self) -> &[ConversationId] {
        &self.pending
    }

    /// Number of identifiers recorded as done.
    #[must_use]
    pub fn done_count(&self) -> usize {
        self.done.len()
    }

    #[must_use]
    pub fn is_done(&self, id: &ConversationId) -> bool {
        self.done.contains(id)
    }

    /// Adds an identifier to the in-memory done set.
    pub fn record_done(&mut self, id: ConversationId) {
        self.done.insert(id);
    }

    /// Pending identifiers not yet done, in file order, each at most once.
    #[must_use]
    pub fn remaining(&self) -> Vec<ConversationId> {
        let mut seen = HashSet::new();
        self.pending
            .iter()
            .filter(|id| !self.done.contains(*id) && seen.insert(*id))
            .cloned()
            .collect()
    }
}

/// File-backed progress store.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    pending_path: PathBuf,
    done_path: PathBuf,
}

impl ProgressStore {
    #[must_use]
    pub fn new(pending_path: impl Into<PathBuf>, done_path: impl Into<PathBuf>) -> Self {
        Self {
            pending_path: pending_path.into(),
            done_path: done_path.into(),
        }
    }

    /// Store over the configured pending and done files.
    #[must_use]
    pub fn from_paths(paths: &ExportPaths) -> Self {
        Self::new(&paths.pending_ids, &paths.done_ids)
    }

    #[must_use]
    pub fn pending_path(&self) -> &Path {
        &self.pending_path
    }

    #[must_use]
    pub fn done_path(&self) -> &Path {
        &self.done_path
    }

    /// Replaces the pending snapshot with `ids`, one per line.
    ///
    /// The new content goes to a sibling temp file which is then renamed over
    /// the snapshot, so readers see either the old or the new list.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] if the file cannot be written.
    #[instrument(skip(self, ids), fields(path = %self.pending_path.display(), count = ids.len()))]
    pub fn write_snapshot(&self, ids: &[ConversationId]) -> Result<(), ProgressError> {
        let path = &self.pending_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ProgressError::io(parent, e))?;
        }

        let tmp = temp_sibling(path);
        let written = write_lines(&tmp, ids).and_then(|()| fs::rename(&tmp, path));
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(ProgressError::io(path, source));
        }

        info!(count = ids.len(), "pending snapshot written");
        Ok(())
    }

    /// Loads the pending snapshot and the done log.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::MissingSnapshot`] if discovery has not run, or
    /// [`ProgressError::Io`] on read failure. A missing done log is an empty set.
    #[instrument(skip(self), fields(pending = %self.pending_path.display(), done = %self.done_path.display()))]
    pub fn load(&self) -> Result<ProgressSnapshot, ProgressError> {
        let pending = match read_ids(&self.pending_path) {
            Ok(ids) => ids,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProgressError::MissingSnapshot {
                    path: self.pending_path.clone(),
                });
            }
            Err(e) => return Err(ProgressError::io(&self.pending_path, e)),
        };

        let done: HashSet<ConversationId> = match read_ids(&self.done_path) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no done log yet");
                HashSet::new()
            }
            Err(e) => return Err(ProgressError::io(&self.done_path, e)),
        };

        debug!(pending = pending.len(), done = done.len(), "progress loaded");
        Ok(ProgressSnapshot { pending, done })
    }

    /// Loads the snapshot if present; used by read-only reporting.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] on read failure.
    pub fn load_if_present(&self) -> Result<Option<ProgressSnapshot>, ProgressError> {
        match self.load() {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(ProgressError::MissingSnapshot { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Appends `id` to the done log and syncs it to disk.
    ///
    /// If the log's last line lacks a trailing newline (e.g. hand-edited), that
    /// line is terminated first so the two identifiers do not merge.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] if the append fails.
    pub fn mark_done(&self, id: &ConversationId) -> Result<(), ProgressError> {
        let path = &self.done_path;
        append_line(path, id.as_str()).map_err(|e| ProgressError::io(path, e))?;
        debug!(conversation_id = %id, "marked done");
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_lines(path: &Path, ids: &[ConversationId]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for id in ids {
        writeln!(writer, "{id}")?;
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

fn read_ids(path: &Path) -> std::io::Result<Vec<ConversationId>> {
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ConversationId::new)
        .collect())
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;

    let mut prefix = "";
    if file.metadata()?.len() > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            prefix = "\n";
        }
    }

    file.write_all(format!("{prefix}{line}\n").as_bytes())?;
    file.sync_data()
}
