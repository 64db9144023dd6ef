//! Deletion: freeing space on a near-capacity primary volume.
//!
//! A file is only removed from the target directory when both hold:
//!
//! - its write-origin row at the target is older than the record age, and
//! - another row shows the same file name verified on a durable destination
//!   for longer than the copy age.
//!
//! Each candidate row is re-read right before its file is removed.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::{DataflowError, Diagnostic, with_trailing_slash};
use crate::ledger::{FileLedger, LedgerEntry, OperationId, timestamp};

/// Default disk utilisation above which files are deleted.
pub const DEFAULT_THRESHOLD: f64 = 0.9;

/// Default minimum age, in seconds, for both ledger rows (30 days).
pub const DEFAULT_OLDER_THAN_SECS: i64 = 30 * 24 * 60 * 60;

/// What [`delete_files`] may delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletePolicy {
    /// Volume to free space on.
    pub target_dir: PathBuf,
    /// Destinations whose verified copies make a file safe to delete.
    pub durable_dests: Vec<PathBuf>,
    /// Fraction of the volume in use (0.0 to 1.0) at which deletion starts.
    pub threshold: f64,
    /// Minimum age of the write-origin row. Negative makes every row old
    /// enough.
    pub record_older_than_secs: i64,
    /// Minimum time since the durable copy was verified.
    pub copied_older_than_secs: i64,
}

impl DeletePolicy {
    /// Policy with the default threshold and ages.
    pub fn new(target_dir: impl Into<PathBuf>, durable_dests: Vec<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            durable_dests,
            threshold: DEFAULT_THRESHOLD,
            record_older_than_secs: DEFAULT_OLDER_THAN_SECS,
            copied_older_than_secs: DEFAULT_OLDER_THAN_SECS,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_ages(mut self, record_older_than_secs: i64, copied_older_than_secs: i64) -> Self {
        self.record_older_than_secs = record_older_than_secs;
        self.copied_older_than_secs = copied_older_than_secs;
        self
    }

    fn check(&self) -> Result<(), DataflowError> {
        if self.durable_dests.is_empty() {
            return Err(DataflowError::Config(
                "deletion needs at least one durable destination".into(),
            ));
        }
        let target = with_trailing_slash(&self.target_dir);
        if self.durable_dests.iter().any(|d| with_trailing_slash(d) == target) {
            return Err(DataflowError::Config(format!(
                "{target} cannot be its own durable destination"
            )));
        }
        self.cutoffs().map(|_| ())
    }

    /// Cutoffs of the write-origin rows and of the durable copies.
    fn cutoffs(&self) -> Result<(String, String), DataflowError> {
        let cutoff = |secs: i64, what: &str| {
            timestamp::cutoff(secs).ok_or_else(|| {
                DataflowError::Config(format!(
                    "{what} age of {secs}s is out of range (at most {} in either direction)",
                    timestamp::MAX_AGE_SECS
                ))
            })
        };
        Ok((
            cutoff(self.record_older_than_secs, "record")?,
            cutoff(self.copied_older_than_secs, "copy")?,
        ))
    }
}

/// Outcome of [`delete_files`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteReport {
    /// Fraction of the target volume in use before deleting.
    pub fraction_used: f64,
    /// Whether the fraction reached the threshold.
    pub triggered: bool,
    pub dry_run: bool,
    /// Rows in both the aged and the durable set.
    pub candidates: usize,
    /// Rows whose file was deleted (or would be, in a dry run).
    pub deleted: Vec<OperationId>,
    /// Aged rows with no durable copy old enough yet.
    pub without_durable_copy: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Fraction of the volume holding `path` that is in use.
///
/// # Errors
///
/// Returns [`DataflowError::Io`] if the volume cannot be queried.
pub fn disk_usage_fraction(path: &Path) -> Result<f64, DataflowError> {
    let total = fs2::total_space(path).map_err(|e| DataflowError::io(path, e))?;
    let free = fs2::free_space(path).map_err(|e| DataflowError::io(path, e))?;
    if total == 0 {
        return Ok(0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let fraction = total.saturating_sub(free) as f64 / total as f64;
    Ok(fraction)
}

/// Why a fresh copy of a candidate row may no longer be deleted.
pub(super) fn recheck(fresh: Option<&LedgerEntry>, target: &str) -> Result<(), &'static str> {
    let Some(entry) = fresh else {
        return Err("row no longer exists");
    };
    if entry.dest_dirname != target {
        return Err("row no longer points at the target directory");
    }
    if entry.is_deleted {
        return Err("row is already marked deleted");
    }
    if !entry.is_write_origin() || entry.is_finished.is_some() {
        return Err("row is no longer a write origin");
    }
    Ok(())
}

/// Deletes files from the policy's target directory that are safely stored
/// on a durable destination, if the target volume is full enough.
///
/// With `dry_run` nothing is removed and the ledger is not modified; the
/// report lists what would be deleted.
///
/// # Errors
///
/// Returns [`DataflowError::Config`] for a policy without durable
/// destinations, naming the target as one, or with an age beyond
/// [`timestamp::MAX_AGE_SECS`], [`DataflowError::Io`] if the
/// volume cannot be queried, and store errors. Per-file problems are
/// [`Diagnostic::UnsafeDeletionAbort`]s.
pub fn delete_files(
    ledger: &FileLedger,
    policy: &DeletePolicy,
    dry_run: bool,
) -> Result<DeleteReport, DataflowError> {
    policy.check()?;
    let target = with_trailing_slash(&policy.target_dir);

    let mut report = DeleteReport {
        fraction_used: disk_usage_fraction(&policy.target_dir)?,
        dry_run,
        ..DeleteReport::default()
    };
    tracing::info!(%target, fraction_used = report.fraction_used, threshold = policy.threshold, "disk usage");
    if report.fraction_used < policy.threshold {
        tracing::info!(%target, "below threshold, nothing to delete");
        return Ok(report);
    }
    report.triggered = true;

    let (candidates, without_durable_copy) = select_candidates(ledger, policy)?;
    report.candidates = candidates.len();
    report.without_durable_copy = without_durable_copy;
    delete_candidates(ledger, &policy.target_dir, candidates, &mut report)?;

    tracing::info!(
        %target,
        dry_run,
        candidates = report.candidates,
        deleted = report.deleted.len(),
        "deletion finished"
    );
    Ok(report)
}

/// Aged write-origin rows at the target with a durable copy, plus the
/// number of aged rows without one.
pub(super) fn select_candidates(
    ledger: &FileLedger,
    policy: &DeletePolicy,
) -> Result<(Vec<LedgerEntry>, usize), DataflowError> {
    let target = with_trailing_slash(&policy.target_dir);
    let (record_cutoff, copy_cutoff) = policy.cutoffs()?;

    let aged = ledger.write_origin_before(&target, &record_cutoff)?;
    let dests: Vec<String> = policy.durable_dests.iter().map(|d| with_trailing_slash(d)).collect();
    let durable: HashSet<String> = ledger
        .durable_copies_before(&dests, &copy_cutoff)?
        .iter()
        .map(|entry| entry.bare_name().to_string())
        .collect();

    let (candidates, unprotected): (Vec<_>, Vec<_>) = aged
        .into_iter()
        .partition(|entry| durable.contains(entry.bare_name()));
    if !unprotected.is_empty() {
        tracing::info!(
            %target,
            count = unprotected.len(),
            "aged files have no durable copy yet"
        );
        for entry in &unprotected {
            tracing::debug!(fname = %entry.fname, "no durable copy");
        }
    }
    Ok((candidates, unprotected.len()))
}

/// Removes the files of `candidates` from `target_dir`, re-reading each row
/// first. Honors `report.dry_run`.
pub(super) fn delete_candidates(
    ledger: &FileLedger,
    target_dir: &Path,
    candidates: Vec<LedgerEntry>,
    report: &mut DeleteReport,
) -> Result<(), DataflowError> {
    let target = with_trailing_slash(target_dir);
    for candidate in candidates {
        let id = candidate.operation_id;
        let fresh = ledger.get(id)?;
        if let Err(reason) = recheck(fresh.as_ref(), &target) {
            report.diagnostics.push(abort(id, candidate.fname, reason));
            continue;
        }

        let path = target_dir.join(&candidate.fname);
        if !path.exists() {
            report.diagnostics.push(abort(id, candidate.fname, "file is already gone"));
            continue;
        }
        if report.dry_run {
            tracing::info!(path = %path.display(), "would delete");
            report.deleted.push(id);
            continue;
        }
        if let Err(e) = fs::remove_file(&path) {
            report
                .diagnostics
                .push(abort(id, candidate.fname, &format!("could not remove file: {e}")));
            continue;
        }
        ledger.mark_deleted(id)?;
        tracing::info!(path = %path.display(), operation_id = %id, "deleted");
        report.deleted.push(id);
    }
    Ok(())
}

fn abort(operation_id: OperationId, fname: String, reason: &str) -> Diagnostic {
    Diagnostic::UnsafeDeletionAbort {
        operation_id,
        fname,
        reason: reason.to_string(),
    }
    .emit()
}
