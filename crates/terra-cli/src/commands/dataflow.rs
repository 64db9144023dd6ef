//! Discovery, copy, verification and deletion commands.

use std::path::Path;

use anyhow::{Context, Result};
use terra_core::config::required;
use terra_core::dataflow::{self, CopyReport, VerifyMode, VerifySummary};

use super::{Workspace, print_diagnostics};

/// Records manifest files present at their primary location.
pub fn write(ws: &Workspace, dest_dir: Option<&Path>, session: Option<&str>) -> Result<()> {
    let dest_dir = match dest_dir {
        Some(dir) => dir,
        None => required(ws.config.write.dest_dir.as_deref(), "[write] dest_dir")?,
    };
    let session = session.or(ws.config.write.session.as_deref());

    let report = dataflow::write_files(&ws.manifest()?, &ws.ledger()?, dest_dir, session)
        .with_context(|| format!("discovery in {} failed", dest_dir.display()))?;
    println!(
        "{}: recorded {} files, {} already tracked, {} missing",
        dest_dir.display(),
        report.recorded.len(),
        report.already_tracked,
        report.diagnostics.len()
    );
    print_diagnostics(&report.diagnostics);
    Ok(())
}

fn print_copy(label: &str, report: &CopyReport) {
    println!(
        "{label}: {} reported, {} recorded, {} verified, {} still pending, {} re-queued after edits ({:.1} min)",
        report.reported,
        report.recorded,
        report.settled.finished.len(),
        report.settled.still_pending.len(),
        report.flagged_edited,
        report.elapsed.as_secs_f64() / 60.0
    );
    print_diagnostics(&report.recovered.diagnostics);
    print_diagnostics(&report.diagnostics);
}

/// Mirrors a single directory.
pub fn copy(ws: &Workspace, src_dir: &Path, dest_dir: &Path) -> Result<()> {
    let report = dataflow::copy_files(
        src_dir,
        dest_dir,
        &ws.ledger()?,
        &ws.manifest()?,
        &ws.config.rsync(),
    )
    .with_context(|| format!("copy {} -> {} failed", src_dir.display(), dest_dir.display()))?;
    print_copy(&src_dir.display().to_string(), &report);
    Ok(())
}

/// Mirrors every session folder of `[copy] src_dir`.
pub fn copy_sessions(ws: &Workspace) -> Result<()> {
    let copy = &ws.config.copy;
    let src_dir = required(copy.src_dir.as_deref(), "[copy] src_dir")?;
    let report = dataflow::copy_sessions(
        src_dir,
        &copy.dest_dirs,
        &copy.exclude_sessions,
        &ws.ledger()?,
        &ws.manifest()?,
        &ws.config.rsync(),
    )
    .with_context(|| format!("copying sessions of {} failed", src_dir.display()))?;
    for (session, session_report) in &report.copies {
        print_copy(session, session_report);
    }
    print_diagnostics(&report.diagnostics);
    Ok(())
}

fn print_summary(summary: &VerifySummary) {
    println!(
        "{} verified, {} removed, {} still pending",
        summary.finished.len(),
        summary.removed.len(),
        summary.still_pending.len()
    );
    print_diagnostics(&summary.diagnostics);
}

/// Verifies pending copies.
pub fn verify(ws: &Workspace, recover: bool) -> Result<()> {
    let mode = if recover {
        VerifyMode::Recover
    } else {
        VerifyMode::Settle
    };
    let summary =
        dataflow::update_copy_status(&ws.ledger()?, mode).context("verification failed")?;
    print_summary(&summary);
    Ok(())
}

/// Frees space on the target volume.
pub fn delete(ws: &Workspace, dry_run: bool) -> Result<()> {
    let policy = ws.config.delete_policy()?;
    let report = dataflow::delete_files(&ws.ledger()?, &policy, dry_run)
        .with_context(|| format!("deletion on {} failed", policy.target_dir.display()))?;

    let percent = report.fraction_used * 100.0;
    if !report.triggered {
        println!(
            "{}: {percent:.1}% used, below threshold of {:.1}%",
            policy.target_dir.display(),
            policy.threshold * 100.0
        );
        return Ok(());
    }
    let verb = if report.dry_run { "would delete" } else { "deleted" };
    println!(
        "{}: {percent:.1}% used, {verb} {} of {} candidates, {} files without durable copy",
        policy.target_dir.display(),
        report.deleted.len(),
        report.candidates,
        report.without_durable_copy
    );
    print_diagnostics(&report.diagnostics);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;
    use terra_core::store::{InsertOptions, json_value};

    use super::*;
    use crate::commands::tables;
    use crate::commands::tests::workspace;

    #[test]
    fn test_write_from_config() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut ws = workspace(dir.path());
        tables::init(&ws).unwrap();

        let data = dir.path().join("nas");
        fs::create_dir_all(data.join("100_2023-01-01")).unwrap();
        fs::write(data.join("100_2023-01-01/100_2023-01-01_rec.bag"), b"bag").unwrap();
        ws.manifest()
            .unwrap()
            .insert_rows(
                &[vec![
                    "mock_obs_1".to_string().into(),
                    json_value(&["100_2023-01-01/100_2023-01-01_rec.bag"]).unwrap(),
                ]],
                &["log_sensor_file_id", "sensor_file_path"],
                &InsertOptions::new(),
            )
            .unwrap();

        assert!(write(&ws, None, None).is_err());

        ws.config.write.dest_dir = Some(data);
        write(&ws, None, None).unwrap();
        write(&ws, None, None).unwrap();
        assert_eq!(ws.ledger().unwrap().entries().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_requires_target() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let ws = workspace(dir.path());
        tables::init(&ws).unwrap();

        let err = delete(&ws, true).unwrap_err();
        assert!(err.to_string().contains("target_dir"));
    }

    #[test]
    fn test_copy_sessions_requires_source() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let ws = workspace(dir.path());
        tables::init(&ws).unwrap();

        assert!(copy_sessions(&ws).is_err());
    }
}
