//! Discovery, copy, verification and deletion of session recordings.
//!
//! # Ordering
//!
//! One [`copy_files`] run always verifies pending rows left by earlier runs
//! first, then asks the mirror tool what it would transfer, records those
//! transfers as pending, runs the real transfer, and verifies again. A run
//! killed at any point leaves rows with `is_finished = false`, which the
//! next run confirms or discards.
//!
//! Two concurrent copy runs against the same destination are not safe; the
//! operations assume a single scheduled batch job.
//!
//! # Diagnostics
//!
//! Per-file problems never abort a run. They are logged with
//! `tracing::warn!` and collected as [`Diagnostic`]s in the returned report.
//! Only store failures, unreadable directories and configuration mistakes
//! are returned as [`DataflowError`].

mod copy;
mod delete;
mod mirror;
mod sessions;
mod verify;
mod write;

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use copy::{CopyReport, VerifyMode, VerifySummary, copy_files, update_copy_status};
pub use delete::{
    DEFAULT_OLDER_THAN_SECS, DEFAULT_THRESHOLD, DeletePolicy, DeleteReport, delete_files,
    disk_usage_fraction,
};
pub use mirror::{Mirror, MirrorError, MirrorOutput, OUT_FORMAT, Rsync, TransferLine, parse_report};
pub use sessions::{SessionsReport, copy_sessions, list_sessions, route_session, subject_id};
pub use verify::{ATTRIBUTE_COMPARED_EXTENSIONS, file_digest, files_match};
pub use write::{WriteReport, write_files};

use crate::ledger::OperationId;
use crate::store::StoreError;

/// Extensions that are expected to be missing from the manifest or the
/// destination; no diagnostic is raised for them.
pub const UNTRACKED_EXTENSIONS: [&str; 6] = ["xdf", "txt", "csv", "jittered", "asc", "log"];

/// Errors that abort a dataflow operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DataflowError {
    /// The ledger or manifest table failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The mirror tool could not be run at all.
    #[error(transparent)]
    Mirror(#[from] MirrorError),

    /// A directory or file could not be read.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A manifest row could not be interpreted.
    #[error("malformed manifest entry {id:?}: {reason}")]
    Manifest {
        /// Id of the offending row.
        id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The operation was configured inconsistently.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DataflowError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal, per-file condition reported by a dataflow operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Diagnostic {
    /// The manifest lists a file that is not at the destination.
    MissingAtDestination { fname: String, dest_dirname: String },

    /// The mirror tool reported a file that no manifest entry lists.
    UnresolvedFile { fname: String },

    /// Source and destination differ after a copy.
    VerificationMismatch {
        operation_id: OperationId,
        fname: String,
        src_dirname: String,
        dest_dirname: String,
        /// Whether the pending row was discarded.
        removed: bool,
    },

    /// A verified copy no longer matches its source; it was flagged for
    /// re-verification.
    EditedAfterCopy { operation_id: OperationId, fname: String },

    /// The mirror tool wrote to stderr.
    TransferToolStderr { stderr: String },

    /// The mirror tool exited unsuccessfully.
    TransferToolStatus { code: Option<i32> },

    /// A deletion candidate failed its re-check and was left alone.
    UnsafeDeletionAbort {
        operation_id: OperationId,
        fname: String,
        reason: String,
    },

    /// A session folder has no numeric subject prefix to route it by.
    UnroutableSession { session: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAtDestination {
                fname,
                dest_dirname,
            } => write!(
                f,
                "{fname} exists in the manifest but does not exist in {dest_dirname}"
            ),
            Self::UnresolvedFile { fname } => write!(f, "no manifest entry found for {fname}"),
            Self::VerificationMismatch {
                operation_id,
                fname,
                src_dirname,
                dest_dirname,
                removed,
            } => {
                write!(
                    f,
                    "transfer of {fname} from {src_dirname} to {dest_dirname} did not finish \
                     (operation {operation_id})"
                )?;
                if *removed {
                    f.write_str("; pending row removed")?;
                }
                Ok(())
            },
            Self::EditedAfterCopy {
                operation_id,
                fname,
            } => write!(
                f,
                "{fname} changed at the source after it was copied (operation {operation_id})"
            ),
            Self::TransferToolStderr { stderr } => write!(f, "mirror tool stderr: {stderr}"),
            Self::TransferToolStatus { code: Some(code) } => {
                write!(f, "mirror tool exited with status {code}")
            },
            Self::TransferToolStatus { code: None } => {
                f.write_str("mirror tool was terminated by a signal")
            },
            Self::UnsafeDeletionAbort {
                operation_id,
                fname,
                reason,
            } => write!(f, "not deleting {fname} (operation {operation_id}): {reason}"),
            Self::UnroutableSession { session } => {
                write!(f, "session folder {session} has no subject id")
            },
        }
    }
}

impl Diagnostic {
    /// Logs the diagnostic and hands it back for collection.
    pub(crate) fn emit(self) -> Self {
        tracing::warn!("{self}");
        self
    }
}

/// Returns `true` if the extension of `fname` is in
/// [`UNTRACKED_EXTENSIONS`].
pub fn is_untracked(fname: &str) -> bool {
    extension(fname).is_some_and(|ext| UNTRACKED_EXTENSIONS.contains(&ext))
}

pub(crate) fn extension(fname: &str) -> Option<&str> {
    Path::new(fname).extension().and_then(|ext| ext.to_str())
}

/// Renders a directory with exactly one trailing slash, the form stored in
/// `src_dirname` and `dest_dirname`.
pub fn with_trailing_slash(dir: &Path) -> String {
    let dir = dir.to_string_lossy();
    let trimmed = dir.trim_end_matches('/');
    format!("{trimmed}/")
}
