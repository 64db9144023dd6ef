//! Discovery: recording files that exist at their primary location.

use std::collections::HashSet;
use std::path::Path;

use super::{DataflowError, Diagnostic, is_untracked, with_trailing_slash};
use crate::ledger::{FileLedger, OperationId, bare_name, timestamp};
use crate::manifest::SensorFileManifest;
use crate::store::Table;

/// Outcome of [`write_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Rows created, in manifest order.
    pub recorded: Vec<OperationId>,
    /// Manifest files that already had a row at the destination.
    pub already_tracked: usize,
    /// Manifest files absent from the destination with an untracked
    /// extension, skipped without a diagnostic.
    pub missing_untracked: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Records manifest files present under `dest_dir` that the ledger does not
/// know about yet.
///
/// Files are tracked under their manifest path, relative to `dest_dir`.
/// With `session`, only files whose base name starts with it are
/// considered. Manifest entries with identical path lists are only counted
/// once, and a path is recorded at most once per run even if it appears in
/// several lists. Re-running with no new files records nothing.
///
/// # Errors
///
/// Returns an error if the manifest or ledger cannot be read or written.
pub fn write_files(
    manifest_table: &Table,
    ledger: &FileLedger,
    dest_dir: &Path,
    session: Option<&str>,
) -> Result<WriteReport, DataflowError> {
    let dest_dirname = with_trailing_slash(dest_dir);
    let mut tracked: HashSet<String> = ledger
        .entries_at(&dest_dirname)?
        .into_iter()
        .map(|entry| entry.fname)
        .collect();
    let manifest = SensorFileManifest::load(manifest_table)?;
    let time_verified = timestamp::now();

    let mut report = WriteReport::default();
    for entry in manifest.deduplicated() {
        for fname in &entry.paths {
            if session.is_some_and(|s| !bare_name(fname).starts_with(s)) {
                continue;
            }
            if tracked.contains(fname) {
                report.already_tracked += 1;
                continue;
            }
            if dest_dir.join(fname).exists() {
                let id = ledger.record_written(&entry.id, &dest_dirname, fname, &time_verified)?;
                tracing::debug!(operation_id = %id, %fname, %dest_dirname, "recorded written file");
                report.recorded.push(id);
                tracked.insert(fname.clone());
            } else if is_untracked(fname) {
                report.missing_untracked += 1;
            } else {
                report.diagnostics.push(
                    Diagnostic::MissingAtDestination {
                        fname: fname.clone(),
                        dest_dirname: dest_dirname.clone(),
                    }
                    .emit(),
                );
            }
        }
    }

    tracing::info!(
        %dest_dirname,
        recorded = report.recorded.len(),
        already_tracked = report.already_tracked,
        missing = report.diagnostics.len(),
        "discovery finished"
    );
    Ok(report)
}
