//! Copying every session folder of a data root, routed across destinations.

use std::fs;
use std::path::{Path, PathBuf};

use super::{CopyReport, DataflowError, Diagnostic, Mirror, copy_files};
use crate::ledger::FileLedger;
use crate::store::Table;

/// Numeric subject id a session folder starts with (`100_2023-01-01` is
/// subject 100).
pub fn subject_id(session: &str) -> Option<u64> {
    session.split('_').next()?.parse().ok()
}

/// Destination root for a session.
///
/// Subjects are spread round-robin: with two roots, odd subject ids go to
/// the first and even ids to the second. Returns `None` if the session has
/// no subject id or there are no roots.
pub fn route_session<'a>(session: &str, dest_roots: &'a [PathBuf]) -> Option<&'a Path> {
    let n = u64::try_from(dest_roots.len()).ok().filter(|n| *n > 0)?;
    let id = subject_id(session)?;
    let index = usize::try_from((id % n + n - 1) % n).ok()?;
    dest_roots.get(index).map(PathBuf::as_path)
}

/// Session folders directly under `src_root`, sorted, without `exclude`.
///
/// # Errors
///
/// Returns [`DataflowError::Io`] if the directory cannot be listed.
pub fn list_sessions(src_root: &Path, exclude: &[String]) -> Result<Vec<String>, DataflowError> {
    let mut sessions = Vec::new();
    for dirent in fs::read_dir(src_root).map_err(|e| DataflowError::io(src_root, e))? {
        let dirent = dirent.map_err(|e| DataflowError::io(src_root, e))?;
        let is_dir = dirent
            .file_type()
            .map_err(|e| DataflowError::io(dirent.path(), e))?
            .is_dir();
        if !is_dir {
            continue;
        }
        let Ok(name) = dirent.file_name().into_string() else {
            tracing::warn!(path = %dirent.path().display(), "skipping session folder with a non UTF-8 name");
            continue;
        };
        if !exclude.contains(&name) {
            sessions.push(name);
        }
    }
    sessions.sort();
    Ok(sessions)
}

/// Outcome of [`copy_sessions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionsReport {
    /// Per-session copy reports, in session order.
    pub copies: Vec<(String, CopyReport)>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs [`copy_files`] for every session folder under `src_root`.
///
/// Each session is mirrored into the root chosen by [`route_session`], so
/// `src_root/S/f` lands at `dest_root/S/f`.
///
/// # Errors
///
/// Returns [`DataflowError::Config`] without destination roots, and the
/// first error of any copy.
pub fn copy_sessions(
    src_root: &Path,
    dest_roots: &[PathBuf],
    exclude: &[String],
    ledger: &FileLedger,
    manifest_table: &Table,
    mirror: &dyn Mirror,
) -> Result<SessionsReport, DataflowError> {
    if dest_roots.is_empty() {
        return Err(DataflowError::Config("no destination directories to copy to".into()));
    }

    let mut report = SessionsReport::default();
    for session in list_sessions(src_root, exclude)? {
        let Some(dest_root) = route_session(&session, dest_roots) else {
            report
                .diagnostics
                .push(Diagnostic::UnroutableSession { session }.emit());
            continue;
        };
        tracing::info!(%session, dest_root = %dest_root.display(), "copying session");
        let copy = copy_files(&src_root.join(&session), dest_root, ledger, manifest_table, mirror)?;
        report.copies.push((session, copy));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_subject_id() {
        assert_eq!(subject_id("100001_2022-02-28"), Some(100_001));
        assert_eq!(subject_id("old"), None);
        assert_eq!(subject_id("_2022"), None);
    }

    #[test]
    fn test_route_by_parity() {
        let roots = vec![PathBuf::from("/neo"), PathBuf::from("/drwho")];
        assert_eq!(route_session("101_2023-01-01", &roots), Some(Path::new("/neo")));
        assert_eq!(route_session("102_2023-01-01", &roots), Some(Path::new("/drwho")));
        assert_eq!(route_session("notes", &roots), None);
        assert_eq!(route_session("101_2023-01-01", &[]), None);
    }

    #[test]
    fn test_route_round_robin() {
        let roots = vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")];
        assert_eq!(route_session("1_x", &roots), Some(Path::new("/a")));
        assert_eq!(route_session("2_x", &roots), Some(Path::new("/b")));
        assert_eq!(route_session("3_x", &roots), Some(Path::new("/c")));
        assert_eq!(route_session("4_x", &roots), Some(Path::new("/a")));
        assert_eq!(route_session("0_x", &roots), Some(Path::new("/c")));
    }

    #[test]
    fn test_list_sessions() {
        let dir = TempDir::new().expect("failed to create temp dir");
        for name in ["102_2023-01-02", "101_2023-01-01", "old"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("README.txt"), "not a session").unwrap();

        let sessions = list_sessions(dir.path(), &["old".to_string()]).unwrap();
        assert_eq!(sessions, vec!["101_2023-01-01", "102_2023-01-02"]);

        let err = list_sessions(&dir.path().join("missing"), &[]).unwrap_err();
        assert!(matches!(err, DataflowError::Io { .. }));
    }
}
