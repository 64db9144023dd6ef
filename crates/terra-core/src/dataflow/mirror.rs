//! The mirror tool seam.
//!
//! Copies are performed by an external directory-synchronization tool
//! (`rsync` in production). The dataflow only needs two things from it: a
//! per-file report of what it would transfer (dry run) and the transfer
//! itself. Both go through [`Mirror`] so tests can substitute an in-process
//! implementation.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use thiserror::Error;

/// Report format requested from rsync: item code, name (plus symlink
/// target), and the transfer timestamp.
pub const OUT_FORMAT: &str = "--out-format=%i %n%L %t";

/// The mirror tool could not be run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MirrorError {
    /// The process could not be started or waited on.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of one mirror run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorOutput {
    /// Report lines, one per item.
    pub stdout: String,
    /// Anything the tool wrote to stderr.
    pub stderr: String,
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl MirrorOutput {
    /// Successful run with the given report.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: Some(0),
        }
    }

    /// `true` if the tool exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A directory mirroring tool.
pub trait Mirror {
    /// Mirrors `src` into `dest` in archive mode.
    ///
    /// With `dry_run`, nothing is written and the report lists what would
    /// be transferred. Paths are passed through verbatim since trailing
    /// slashes change the tool's behaviour.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] only if the tool could not be run; a run that
    /// exits unsuccessfully is reported through [`MirrorOutput::code`].
    fn run(&self, src: &str, dest: &str, dry_run: bool) -> Result<MirrorOutput, MirrorError>;
}

/// Runs the `rsync` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rsync {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl Default for Rsync {
    fn default() -> Self {
        Self {
            program: PathBuf::from("rsync"),
            extra_args: Vec::new(),
        }
    }
}

impl Rsync {
    /// `rsync` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific program.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Appends arguments after the standard ones.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self, src: &str, dest: &str, dry_run: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(src).arg(dest).arg("-a");
        if dry_run {
            cmd.arg("--dry-run");
        }
        cmd.arg(OUT_FORMAT)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Mirror for Rsync {
    fn run(&self, src: &str, dest: &str, dry_run: bool) -> Result<MirrorOutput, MirrorError> {
        tracing::debug!(program = %self.program.display(), src, dest, dry_run, "running mirror");
        let output = self
            .command(src, dest, dry_run)
            .output()
            .map_err(|source| MirrorError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        Ok(MirrorOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }
}

/// One file the mirror tool reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLine {
    /// Item code, e.g. `>f+++++++++`.
    pub operation: String,
    /// Name relative to the destination; may contain spaces.
    pub fname: String,
    pub date: String,
    pub time: String,
}

/// Extracts file transfers (`>f` lines) from a mirror report.
///
/// The date and time are always the last two space-separated tokens, so
/// everything between the item code and them is the file name. Lines with
/// fewer than four tokens are skipped.
pub fn parse_report(stdout: &str) -> Vec<TransferLine> {
    stdout
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| line.starts_with(">f"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split(' ').collect();
            let n = tokens.len();
            if n < 4 {
                tracing::debug!(line, "skipping short mirror report line");
                return None;
            }
            Some(TransferLine {
                operation: tokens[0].to_string(),
                fname: tokens[1..n - 2].join(" "),
                date: tokens[n - 2].to_string(),
                time: tokens[n - 1].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_report() {
        let stdout = "\
sending incremental file list
cd+++++++++ 100_2023-01-01/ 2023/01/01 10:00:00
>f+++++++++ 100_2023-01-01/100_2023-01-01_rec.xdf 2023/01/01 10:00:00
>f.st...... 100_2023-01-01/notes with  spaces.txt 2023/01/01 10:00:01
>f+++++++++ broken
";
        let lines = parse_report(stdout);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].operation, ">f+++++++++");
        assert_eq!(lines[0].fname, "100_2023-01-01/100_2023-01-01_rec.xdf");
        assert_eq!(lines[0].date, "2023/01/01");
        assert_eq!(lines[0].time, "10:00:00");
        assert_eq!(lines[1].fname, "100_2023-01-01/notes with  spaces.txt");
        assert_eq!(lines[1].operation, ">f.st......");
    }

    #[test]
    fn test_parse_report_crlf() {
        let lines = parse_report(">f+++++++++ a.txt 2023/01/01 10:00:00\r\n");
        assert_eq!(lines[0].time, "10:00:00");
    }

    #[test]
    fn test_rsync_command_line() {
        let rsync = Rsync::new().with_args(["--chmod=ug+rw"]);

        let dry: Vec<_> = rsync
            .command("/nas/data/s1", "/neo/data", true)
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            dry,
            ["/nas/data/s1", "/neo/data", "-a", "--dry-run", OUT_FORMAT, "--chmod=ug+rw"]
        );

        let real = rsync.command("/nas/data/s1", "/neo/data/", false);
        assert!(!real.get_args().any(|a| a == "--dry-run"));
        assert_eq!(real.get_program(), "rsync");
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_run_missing_program() {
        let rsync = Rsync::new().with_program("nonexistent_mirror_12345");
        let err = rsync.run("a", "b", true).unwrap_err();
        assert!(matches!(err, MirrorError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_run_captures_output() {
        let rsync = Rsync::new().with_program("echo");
        let output = rsync.run("src", "dest", true).unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("src dest -a --dry-run"));
        assert!(parse_report(&output.stdout).is_empty());
    }

    proptest! {
        #[test]
        fn prop_filename_with_spaces_survives(
            name in "[A-Za-z0-9_.-]{1,12}( {1,3}[A-Za-z0-9_.-]{1,12}){0,4}",
        ) {
            let line = format!(">f+++++++++ {name} 2023/01/01 10:00:00\n");
            let parsed = parse_report(&line);
            prop_assert_eq!(parsed.len(), 1);
            prop_assert_eq!(&parsed[0].fname, &name);
            prop_assert_eq!(&parsed[0].date, "2023/01/01");
        }
    }
}
