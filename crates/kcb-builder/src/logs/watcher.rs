//! Results-directory watcher and upload loop.
//!
//! Rotation detection is a best-effort heuristic: a tracked file is reopened
//! when it has no handle yet, when its inode changed, or when it shrank since
//! the previous pass. Re-uploading a few lines after a rotation is acceptable;
//! reading a stale handle into a replaced file is not.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::task::JoinHandle;

use super::ReaderExit;
use crate::error::{Error, Result};
use crate::session::HubSession;

const TRACKED_EXTENSIONS: [&str; 2] = [".log", ".json"];

#[derive(Debug)]
struct TrackedFile {
    path: PathBuf,
    file: Option<File>,
    inode: Option<u64>,
    size: u64,
}

/// Tracks uploadable files in a directory.
#[derive(Debug)]
pub struct FileWatcher {
    dir: PathBuf,
    logs: BTreeMap<String, TrackedFile>,
}

impl FileWatcher {
    /// Creates a watcher for `dir`. The directory need not exist yet.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            logs: BTreeMap::new(),
        }
    }

    /// Number of files registered so far.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.logs.len()
    }

    async fn list_files(&mut self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(dir = %self.dir.display(), error = %err, "results directory not readable yet");
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if TRACKED_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
                && !self.logs.contains_key(&name)
            {
                tracing::debug!(file = %name, "tracking new file");
                self.logs.insert(
                    name,
                    TrackedFile {
                        path: entry.path(),
                        file: None,
                        inode: None,
                        size: 0,
                    },
                );
            }
        }
    }

    /// Registers new files and reopens rotated ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ActionNotAllowed`] if a tracked file can no longer be
    /// inspected, which happens when the build was cancelled underneath us.
    pub async fn refresh(&mut self) -> Result<()> {
        self.list_files().await;

        for (name, tracked) in &mut self.logs {
            let meta = tokio::fs::metadata(&tracked.path).await.map_err(|err| {
                tracing::error!(path = %tracked.path.display(), error = %err, "the build has been cancelled");
                Error::ActionNotAllowed {
                    message: format!("cannot inspect {name}: {err}"),
                }
            })?;
            let inode = inode_of(&meta);
            let size = meta.len();

            let rotated = tracked.inode != Some(inode) || size < tracked.size;
            if tracked.file.is_none() || rotated {
                if tracked.file.is_some() {
                    tracing::info!(
                        path = %tracked.path.display(),
                        old_inode = ?tracked.inode,
                        new_inode = inode,
                        old_size = tracked.size,
                        new_size = size,
                        "rereading file"
                    );
                }
                tracked.file = match File::open(&tracked.path).await {
                    Ok(file) => Some(file),
                    Err(err) => {
                        tracing::error!(path = %tracked.path.display(), error = %err, "error reading log");
                        None
                    }
                };
            }
            tracked.inode = Some(inode);
            tracked.size = size;
        }
        Ok(())
    }

    /// Files with an open handle, ready to be uploaded from.
    pub fn ready_files(&mut self) -> impl Iterator<Item = (&str, &mut File)> {
        self.logs
            .iter_mut()
            .filter_map(|(name, tracked)| tracked.file.as_mut().map(|f| (name.as_str(), f)))
    }

    /// Refreshes and uploads everything that grew.
    ///
    /// # Errors
    ///
    /// Propagates refresh and upload failures.
    pub async fn upload(&mut self, session: &dyn HubSession, upload_path: &str) -> Result<()> {
        self.refresh().await?;
        for (name, file) in self.ready_files() {
            let sent = session.incremental_upload(name, file, upload_path).await?;
            if sent > 0 {
                tracing::trace!(file = name, bytes = sent, "uploaded");
            }
        }
        Ok(())
    }

    /// Closes every open handle.
    pub fn clean(&mut self) {
        for tracked in self.logs.values_mut() {
            tracked.file = None;
        }
    }
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> u64 {
    0
}

/// Uploads the results directory until the log reader finishes.
///
/// With a reader, each pass sleeps `poll` and checks whether the reader is
/// done; the pass that observes completion is the final scan. Without a
/// reader a single pass is made.
///
/// # Errors
///
/// Returns [`Error::ActionNotAllowed`] if the task was cancelled, or any
/// upload failure.
pub async fn watch_and_upload(
    session: &dyn HubSession,
    dir: &Path,
    upload_path: &str,
    poll: Duration,
    reader: Option<&JoinHandle<ReaderExit>>,
) -> Result<()> {
    let mut watcher = FileWatcher::new(dir);
    let mut finished = false;
    let mut result = Ok(());

    while !finished {
        match reader {
            None => finished = true,
            Some(handle) => {
                tokio::time::sleep(poll).await;
                finished = handle.is_finished();
            }
        }
        if let Err(err) = watcher.upload(session, upload_path).await {
            result = Err(err);
            break;
        }
    }

    watcher.clean();
    result
}
