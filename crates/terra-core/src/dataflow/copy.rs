//! Copy: mirroring a directory and verifying what was transferred.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use super::{
    DataflowError, Diagnostic, Mirror, MirrorOutput, files_match, is_untracked, parse_report,
    with_trailing_slash,
};
use crate::ledger::{FileLedger, OperationId, PendingCopy, timestamp};
use crate::manifest::SensorFileManifest;
use crate::store::Table;

/// How [`update_copy_status`] treats a pending copy that does not match
/// its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Recovery after an interrupted run: discard the stub row and report
    /// it. The next dry run rediscovers the file.
    Recover,
    /// Right after a transfer: leave the row pending for the next run.
    Settle,
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub finished: Vec<OperationId>,
    pub removed: Vec<OperationId>,
    pub still_pending: Vec<OperationId>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Verifies every pending copy in the ledger.
///
/// A copy whose destination matches its source is marked finished with the
/// current time. A mismatch discards the row under [`VerifyMode::Recover`]
/// and leaves it pending under [`VerifyMode::Settle`].
///
/// # Errors
///
/// Returns an error if the ledger cannot be read or updated.
pub fn update_copy_status(
    ledger: &FileLedger,
    mode: VerifyMode,
) -> Result<VerifySummary, DataflowError> {
    let mut summary = VerifySummary::default();
    for entry in ledger.unfinished()? {
        let Some(src_dirname) = entry.src_dirname.as_deref() else {
            tracing::warn!(operation_id = %entry.operation_id, "pending row without a source directory");
            summary.still_pending.push(entry.operation_id);
            continue;
        };

        if files_match(Path::new(src_dirname), Path::new(&entry.dest_dirname), &entry.fname) {
            ledger.mark_finished(entry.operation_id, &timestamp::now())?;
            summary.finished.push(entry.operation_id);
            continue;
        }

        match mode {
            VerifyMode::Recover => {
                ledger.remove(entry.operation_id)?;
                summary.removed.push(entry.operation_id);
                summary.diagnostics.push(
                    Diagnostic::VerificationMismatch {
                        operation_id: entry.operation_id,
                        fname: entry.fname,
                        src_dirname: src_dirname.to_string(),
                        dest_dirname: entry.dest_dirname,
                        removed: true,
                    }
                    .emit(),
                );
            },
            VerifyMode::Settle => {
                tracing::debug!(operation_id = %entry.operation_id, fname = %entry.fname, "copy not verified yet");
                summary.still_pending.push(entry.operation_id);
            },
        }
    }

    tracing::info!(
        ?mode,
        finished = summary.finished.len(),
        removed = summary.removed.len(),
        still_pending = summary.still_pending.len(),
        "verified pending copies"
    );
    Ok(summary)
}

/// Outcome of [`copy_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Verification of rows left pending by earlier runs.
    pub recovered: VerifySummary,
    /// Files the dry run reported.
    pub reported: usize,
    /// Pending rows written before the transfer.
    pub recorded: usize,
    /// Reported files with a verified copy that still matches.
    pub unchanged: usize,
    /// Verified copies flagged for re-verification because the source
    /// changed.
    pub flagged_edited: usize,
    /// Reported files that already had a pending row.
    pub already_pending: usize,
    /// Reported files outside the manifest with an untracked extension.
    pub skipped_untracked: usize,
    /// Wall time of the real transfer.
    pub elapsed: Duration,
    /// Verification right after the transfer.
    pub settled: VerifySummary,
    /// Diagnostics of the copy itself (unresolved files, tool errors,
    /// edited files); verification diagnostics are in the summaries.
    pub diagnostics: Vec<Diagnostic>,
}

/// The directory that reported names are relative to on the source side.
///
/// Without a trailing slash the mirror tool transfers the directory itself,
/// so names start with its last component and resolve against its parent.
fn source_root(src: &str) -> String {
    if src.ends_with('/') {
        return with_trailing_slash(Path::new(src));
    }
    match Path::new(src).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => with_trailing_slash(parent),
        _ => "./".to_string(),
    }
}

fn check_tool(output: &MirrorOutput, diagnostics: &mut Vec<Diagnostic>) {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        diagnostics.push(
            Diagnostic::TransferToolStderr {
                stderr: stderr.to_string(),
            }
            .emit(),
        );
    }
    if !output.success() {
        diagnostics.push(Diagnostic::TransferToolStatus { code: output.code }.emit());
    }
}

/// Mirrors `src_dir` into `dest_dir` and records the transfer in the ledger.
///
/// Steps, in order: recover rows left pending by an earlier run, dry-run
/// the mirror, record a pending row for each reported manifest file, run
/// the real mirror, and verify the pending rows.
///
/// A reported file that already has a verified copy at `dest_dir` is
/// re-checked against the source: if it still matches nothing is written,
/// otherwise the verified row is flagged unfinished so the next
/// verification picks it up.
///
/// # Errors
///
/// Returns an error if the mirror tool cannot be started or the ledger or
/// manifest cannot be accessed. Everything else is a [`Diagnostic`].
pub fn copy_files(
    src_dir: &Path,
    dest_dir: &Path,
    ledger: &FileLedger,
    manifest_table: &Table,
    mirror: &dyn Mirror,
) -> Result<CopyReport, DataflowError> {
    let mut report = CopyReport {
        recovered: update_copy_status(ledger, VerifyMode::Recover)?,
        ..CopyReport::default()
    };

    let src = src_dir.to_string_lossy();
    let src_dirname = source_root(&src);
    let dest_dirname = with_trailing_slash(dest_dir);
    let dry_dest = match dest_dirname.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };

    let dry = mirror.run(&src, dry_dest, true)?;
    check_tool(&dry, &mut report.diagnostics);
    let transfers = parse_report(&dry.stdout);
    report.reported = transfers.len();

    let manifest = SensorFileManifest::load(manifest_table)?;
    let index = manifest.path_index();

    let mut queued = HashSet::new();
    let mut pending = Vec::new();
    for line in transfers {
        let Some(sensor_file_id) = index.get(line.fname.as_str()) else {
            if is_untracked(&line.fname) {
                report.skipped_untracked += 1;
            } else {
                report
                    .diagnostics
                    .push(Diagnostic::UnresolvedFile { fname: line.fname }.emit());
            }
            continue;
        };

        if let Some(done) = ledger.finished_copy(&dest_dirname, &line.fname)? {
            if files_match(Path::new(&src_dirname), dest_dir, &line.fname) {
                report.unchanged += 1;
            } else {
                ledger.mark_unfinished(done.operation_id)?;
                report.flagged_edited += 1;
                report.diagnostics.push(
                    Diagnostic::EditedAfterCopy {
                        operation_id: done.operation_id,
                        fname: line.fname,
                    }
                    .emit(),
                );
            }
            continue;
        }

        if ledger.pending_copy(&dest_dirname, &line.fname)?.is_some()
            || !queued.insert(line.fname.clone())
        {
            report.already_pending += 1;
            continue;
        }

        pending.push(PendingCopy {
            sensor_file_id: (*sensor_file_id).to_string(),
            src_dirname: src_dirname.clone(),
            dest_dirname: dest_dirname.clone(),
            fname: line.fname,
            rsync_operation: line.operation,
        });
    }
    report.recorded = ledger.record_pending(&pending)?;

    let started = Instant::now();
    let real = mirror.run(&src, &dest_dirname, false)?;
    report.elapsed = started.elapsed();
    tracing::info!(
        %src,
        %dest_dirname,
        elapsed_hours = report.elapsed.as_secs_f64() / 3600.0,
        "mirror finished"
    );
    check_tool(&real, &mut report.diagnostics);

    report.settled = update_copy_status(ledger, VerifyMode::Settle)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_root() {
        assert_eq!(source_root("/nas/data/100_2023-01-01"), "/nas/data/");
        assert_eq!(source_root("/nas/data/100_2023-01-01/"), "/nas/data/100_2023-01-01/");
        assert_eq!(source_root("session"), "./");
    }
}
