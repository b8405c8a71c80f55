//! Incremental build log handling.
//!
//! Two cooperating tasks share the results directory while a build runs:
//!
//! - [`LogStreamer`] follows the orchestrator log stream and appends it to
//!   files in the directory
//! - [`FileWatcher`] (driven by [`watch_and_upload`]) polls the directory and
//!   uploads whatever grew since the last pass
//!
//! The directory is the only state they share. Each side opens its own file
//! handles.

pub mod streamer;
pub mod warnings;
pub mod watcher;

pub use streamer::{LogStreamer, ReaderExit};
pub use warnings::UserWarnings;
pub use watcher::{FileWatcher, watch_and_upload};

/// Platform tag of log entries that name a metadata file to copy.
pub const METADATA_TAG: &str = "_metadata_";

/// Log file name prefix for untagged, orchestrator-level lines.
pub const ORCHESTRATOR_LOG_PREFIX: &str = "orchestrator";

/// Combined log file of container builds.
pub const COMBINED_LOG_BASENAME: &str = "openshift-incremental.log";

/// Combined log file of source container builds.
pub const SOURCE_COMBINED_LOG_BASENAME: &str = "orchestrator.log";

/// File collecting user-facing build warnings.
pub const USER_WARNINGS_FILENAME: &str = "user_warnings.log";

/// How the log stream is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// One file per platform tag.
    Demultiplexed,
    /// A single file with every line.
    Combined {
        /// File name inside the results directory.
        basename: &'static str,
    },
}

impl LogMode {
    /// Combined log of container builds.
    pub const CONTAINER_COMBINED: Self = Self::Combined {
        basename: COMBINED_LOG_BASENAME,
    };

    /// Combined log of source container builds.
    pub const SOURCE_COMBINED: Self = Self::Combined {
        basename: SOURCE_COMBINED_LOG_BASENAME,
    };
}
