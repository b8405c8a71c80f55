//! Follow-mode log reader.
//!
//! [`LogStreamer`] runs as its own task for the lifetime of a build. It
//! connects its own orchestrator client, follows the log stream and persists
//! every entry to the results directory. A failure ends the reader only; the
//! supervising task still waits for the build to finish.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use kcb_core::{BuildHandle, BuilderConfig};

use super::{LogMode, METADATA_TAG, ORCHESTRATOR_LOG_PREFIX, UserWarnings};
use crate::error::{Error, Result};
use crate::orchestrator::{
    ClientProfile, LogEntry, Orchestrator, OrchestratorConnector, OrchestratorError,
};

/// How the reader task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The stream ended and the build had finished.
    Completed,
    /// The reader gave up.
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl ReaderExit {
    /// Process-style exit code: 0 on completion, 1 on failure.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Failed { .. } => 1,
        }
    }
}

impl fmt::Display for ReaderExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed { message } => write!(f, "FAILED: {message}"),
        }
    }
}

/// Persists a build's log stream into a results directory.
pub struct LogStreamer {
    connector: Arc<dyn OrchestratorConnector>,
    profile: ClientProfile,
    handle: BuildHandle,
    logs_dir: PathBuf,
    koji_work_dir: PathBuf,
    mode: LogMode,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl LogStreamer {
    /// Creates a reader with default retry settings and demultiplexed output.
    #[must_use]
    pub fn new(
        connector: Arc<dyn OrchestratorConnector>,
        profile: ClientProfile,
        handle: BuildHandle,
        logs_dir: impl Into<PathBuf>,
    ) -> Self {
        let defaults = BuilderConfig::default();
        Self {
            connector,
            profile,
            handle,
            logs_dir: logs_dir.into(),
            koji_work_dir: defaults.koji_work_dir.clone(),
            mode: LogMode::Demultiplexed,
            retry_attempts: defaults.log_retry_attempts,
            retry_delay: defaults.log_retry_delay(),
        }
    }

    /// Creates a reader writing into the configured results directory.
    #[must_use]
    pub fn from_config(
        connector: Arc<dyn OrchestratorConnector>,
        profile: ClientProfile,
        handle: BuildHandle,
        config: &BuilderConfig,
    ) -> Self {
        Self::new(connector, profile, handle, config.results_dir())
            .with_koji_work_dir(&config.koji_work_dir)
            .with_retry(config.log_retry_attempts, config.log_retry_delay())
    }

    /// Sets the output layout.
    #[must_use]
    pub const fn with_mode(mut self, mode: LogMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the work area metadata files are copied from.
    #[must_use]
    pub fn with_koji_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.koji_work_dir = dir.into();
        self
    }

    /// Sets the number of stream attempts and the delay between them.
    #[must_use]
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// Runs the reader on its own task.
    pub fn spawn(self) -> JoinHandle<ReaderExit> {
        let span = tracing::info_span!("log_reader", build_id = %self.handle);
        tokio::spawn(self.run_to_exit().instrument(span))
    }

    async fn run_to_exit(self) -> ReaderExit {
        match self.run().await {
            Ok(()) => ReaderExit::Completed,
            Err(err) => {
                tracing::info!(error = %err, "error while saving incremental logs");
                ReaderExit::Failed {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Follows the log stream to its end, then checks the build finished.
    ///
    /// # Errors
    ///
    /// - [`Error::LogStream`] if the stream keeps failing or a line cannot be written
    /// - [`Error::BuildStillRunning`] if the stream ended before the build did
    pub async fn run(&self) -> Result<()> {
        let client = self.connector.connect(self.profile).await?;
        tokio::fs::create_dir_all(&self.logs_dir)
            .await
            .map_err(|e| Error::io(&self.logs_dir, e))?;

        let mode = match self.mode {
            LogMode::Demultiplexed if !client.supports_orchestrator_logs() => {
                LogMode::CONTAINER_COMBINED
            }
            mode => mode,
        };
        match mode {
            LogMode::Demultiplexed => {
                tracing::info!(dir = %self.logs_dir.display(), "writing demultiplexed logs");
            }
            LogMode::Combined { basename } => {
                tracing::info!(file = basename, "writing follow log");
            }
        }

        let mut sink = LogSink::new(&self.logs_dir, &self.koji_work_dir, mode);
        let streamed = self.stream_with_retry(client.as_ref(), &mut sink).await;
        let finished = sink.finish().await;
        streamed?;
        finished?;

        let response = client.get_build(&self.handle).await?;
        if response.status.is_active() {
            return Err(Error::BuildStillRunning {
                status: response.status.to_string(),
            });
        }
        Ok(())
    }

    async fn stream_with_retry(&self, client: &dyn Orchestrator, sink: &mut LogSink) -> Result<()> {
        let mut consumed = 0_u64;
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            match self.stream_once(client, sink, &mut consumed).await? {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retry_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry_attempts,
                        consumed,
                        error = %err,
                        "log stream failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    return Err(Error::log_stream(format!(
                        "Exception while waiting for build logs: {err}"
                    )));
                }
            }
        }
    }

    /// Reads one stream. The outer error is a local, fatal failure; the inner
    /// one is a stream failure worth another attempt.
    async fn stream_once(
        &self,
        client: &dyn Orchestrator,
        sink: &mut LogSink,
        consumed: &mut u64,
    ) -> Result<std::result::Result<(), OrchestratorError>> {
        let opened = match sink.mode {
            LogMode::Demultiplexed => client.orchestrator_build_logs(&self.handle, true).await,
            LogMode::Combined { .. } => client.build_logs(&self.handle, true).await,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => return Ok(Err(err)),
        };

        let mut index = 0_u64;
        while let Some(item) = stream.next().await {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => return Ok(Err(err)),
            };
            index += 1;
            // A reconnected stream replays from the start.
            if index <= *consumed {
                continue;
            }
            sink.write(entry).await?;
            *consumed = index;
        }
        Ok(Ok(()))
    }
}

/// Open log files of one reader.
struct LogSink {
    dir: PathBuf,
    koji_work_dir: PathBuf,
    mode: LogMode,
    files: HashMap<Option<String>, File>,
    warnings: UserWarnings,
}

impl LogSink {
    fn new(dir: &Path, koji_work_dir: &Path, mode: LogMode) -> Self {
        Self {
            dir: dir.to_path_buf(),
            koji_work_dir: koji_work_dir.to_path_buf(),
            mode,
            files: HashMap::new(),
            warnings: UserWarnings::new(),
        }
    }

    async fn write(&mut self, entry: LogEntry) -> Result<()> {
        if self.mode == LogMode::Demultiplexed && entry.platform.as_deref() == Some(METADATA_TAG) {
            return self.copy_metadata(&entry.line).await;
        }
        if self.warnings.capture(&entry.line) {
            return Ok(());
        }

        let key = match self.mode {
            LogMode::Demultiplexed => entry.platform,
            LogMode::Combined { .. } => None,
        };
        let file = self.file_for(key).await?;
        write_line(file, &entry.line).await
    }

    async fn file_for(&mut self, key: Option<String>) -> Result<&mut File> {
        if !self.files.contains_key(&key) {
            let name = self.open(key.clone()).await?;
            if let Some(platform) = key.as_deref() {
                if !self.files.contains_key(&None) {
                    self.open(None).await?;
                }
                if let Some(main) = self.files.get_mut(&None) {
                    let note = format!("{platform} build log continues in {name}");
                    write_line(main, &note).await?;
                }
            }
        }
        self.files
            .get_mut(&key)
            .ok_or_else(|| Error::log_stream("log file was not opened"))
    }

    /// Creates (truncating) the file for `key` and returns its name.
    async fn open(&mut self, key: Option<String>) -> Result<String> {
        let name = match (self.mode, key.as_deref()) {
            (LogMode::Combined { basename }, _) => basename.to_string(),
            (LogMode::Demultiplexed, None) => format!("{ORCHESTRATOR_LOG_PREFIX}.log"),
            (LogMode::Demultiplexed, Some(platform)) => {
                format!("{}.log", platform.replace(['/', '\\'], "_"))
            }
        };
        let path = self.dir.join(&name);
        let file = File::create(&path).await.map_err(|e| Error::io(&path, e))?;
        tracing::debug!(path = %path.display(), "opened log file");
        self.files.insert(key, file);
        Ok(name)
    }

    async fn copy_metadata(&self, name: &str) -> Result<()> {
        let relative = Path::new(name.trim());
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        let file_name = relative.file_name().filter(|_| !escapes).ok_or_else(|| {
            Error::log_stream(format!("invalid metadata file reference: {name}"))
        })?;

        let source = self.koji_work_dir.join(relative);
        let target = self.dir.join(file_name);
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| Error::io(&source, e))?;
        tracing::debug!(source = %source.display(), target = %target.display(), "copied metadata file");
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        for (_, mut file) in self.files.drain() {
            file.flush()
                .await
                .map_err(|e| Error::log_stream(format!("failed to flush build log: {e}")))?;
        }
        if !self.warnings.is_empty() {
            self.warnings.write_to(&self.dir).await?;
        }
        tracing::info!(dir = %self.dir.display(), "build logs written");
        Ok(())
    }
}

async fn write_line(file: &mut File, line: &str) -> Result<()> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    file.write_all(&bytes)
        .await
        .map_err(|e| Error::log_stream(format!("Exception while writing build logs: {e}")))?;
    file.flush()
        .await
        .map_err(|e| Error::log_stream(format!("Exception while writing build logs: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(ReaderExit::Completed.code(), 0);
        let failed = ReaderExit::Failed {
            message: "stream closed".into(),
        };
        assert_eq!(failed.code(), 1);
        assert_eq!(failed.to_string(), "FAILED: stream closed");
    }

    #[tokio::test]
    async fn demultiplexes_and_copies_metadata() {
        let work = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(work.path().join("tasks/1"))
            .await
            .unwrap();
        tokio::fs::write(work.path().join("tasks/1/f.log"), b"\x00meta\xff")
            .await
            .unwrap();

        let mut sink = LogSink::new(logs.path(), work.path(), LogMode::Demultiplexed);
        sink.write(LogEntry::untagged("a")).await.unwrap();
        sink.write(LogEntry::tagged("x86_64", "b")).await.unwrap();
        sink.write(LogEntry::tagged(METADATA_TAG, "tasks/1/f.log"))
            .await
            .unwrap();
        sink.write(LogEntry::tagged("x86_64", r#"p - user_warning - {"message": "w"}"#))
            .await
            .unwrap();
        sink.finish().await.unwrap();

        let main = tokio::fs::read_to_string(logs.path().join("orchestrator.log"))
            .await
            .unwrap();
        assert!(main.starts_with("a\n"));
        assert!(main.contains("x86_64 build log continues in x86_64.log"));
        let x86 = tokio::fs::read_to_string(logs.path().join("x86_64.log"))
            .await
            .unwrap();
        assert_eq!(x86, "b\n");
        let copied = tokio::fs::read(logs.path().join("f.log")).await.unwrap();
        assert_eq!(copied, b"\x00meta\xff");
        let warnings = UserWarnings::load(logs.path()).await;
        assert_eq!(warnings.into_vec(), ["w"]);
    }

    #[tokio::test]
    async fn refuses_metadata_outside_work_area() {
        let work = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let sink = LogSink::new(logs.path(), work.path(), LogMode::Demultiplexed);
        assert!(sink.copy_metadata("../secret.log").await.is_err());
        assert!(sink.copy_metadata("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn combined_mode_ignores_platform_tags() {
        let logs = tempfile::tempdir().unwrap();
        let mut sink = LogSink::new(logs.path(), logs.path(), LogMode::SOURCE_COMBINED);
        sink.write(LogEntry::tagged("x86_64", "one")).await.unwrap();
        sink.write(LogEntry::untagged("two")).await.unwrap();
        sink.finish().await.unwrap();

        let combined = tokio::fs::read_to_string(logs.path().join("orchestrator.log"))
            .await
            .unwrap();
        assert_eq!(combined, "one\ntwo\n");
        assert!(!logs.path().join("x86_64.log").exists());
    }
}
