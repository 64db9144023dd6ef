//! Source/destination comparison for copied files.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::extension;

/// Large write-once recordings, compared by size and modification time
/// instead of content.
pub const ATTRIBUTE_COMPARED_EXTENSIONS: [&str; 2] = ["bag", "avi"];

/// Hex SHA-256 of a file, streamed.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn same_attributes(src: &Path, dest: &Path) -> io::Result<bool> {
    let src = fs::metadata(src)?;
    let dest = fs::metadata(dest)?;
    Ok(src.len() == dest.len() && src.modified()? == dest.modified()?)
}

fn same_digest(src: &Path, dest: &Path) -> io::Result<bool> {
    Ok(file_digest(src)? == file_digest(dest)?)
}

/// Returns `true` if `fname` is identical under both directories.
///
/// A file that is missing or unreadable on either side does not match.
pub fn files_match(src_dir: &Path, dest_dir: &Path, fname: &str) -> bool {
    let src = src_dir.join(fname);
    let dest = dest_dir.join(fname);
    let by_attributes = extension(fname).is_some_and(|ext| ATTRIBUTE_COMPARED_EXTENSIONS.contains(&ext));

    let compared = if by_attributes {
        same_attributes(&src, &dest)
    } else {
        same_digest(&src, &dest)
    };
    match compared {
        Ok(matched) => {
            if !matched {
                tracing::debug!(fname, by_attributes, "source and destination differ");
            }
            matched
        },
        Err(e) => {
            tracing::debug!(fname, error = %e, "could not compare files");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    use super::*;

    fn dirs() -> (TempDir, TempDir) {
        (
            TempDir::new().expect("failed to create temp dir"),
            TempDir::new().expect("failed to create temp dir"),
        )
    }

    fn write(dir: &Path, fname: &str, contents: &[u8], mtime: SystemTime) {
        let path = dir.join(fname);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn test_digest_is_sha256() {
        let (src, _dest) = dirs();
        write(src.path(), "a.txt", b"abc", SystemTime::now());
        assert_eq!(
            file_digest(&src.path().join("a.txt")).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_content_comparison() {
        let (src, dest) = dirs();
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        write(src.path(), "s/a.hdf5", b"same", t);
        write(dest.path(), "s/a.hdf5", b"same", t + Duration::from_secs(60));
        write(src.path(), "s/b.hdf5", b"one", t);
        write(dest.path(), "s/b.hdf5", b"two", t);

        assert!(files_match(src.path(), dest.path(), "s/a.hdf5"));
        assert!(!files_match(src.path(), dest.path(), "s/b.hdf5"));
    }

    #[test]
    fn test_missing_file_does_not_match() {
        let (src, dest) = dirs();
        write(src.path(), "a.txt", b"x", SystemTime::now());
        assert!(!files_match(src.path(), dest.path(), "a.txt"));
        assert!(!files_match(dest.path(), src.path(), "a.txt"));
        assert!(!files_match(src.path(), dest.path(), "nowhere.bag"));
    }

    #[test]
    fn test_attribute_comparison_for_recordings() {
        let (src, dest) = dirs();
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        // Same size and mtime: not hashed, so different bytes still match.
        write(src.path(), "rec.bag", b"aaaa", t);
        write(dest.path(), "rec.bag", b"bbbb", t);
        assert!(files_match(src.path(), dest.path(), "rec.bag"));

        write(src.path(), "cam.avi", b"aaaa", t);
        write(dest.path(), "cam.avi", b"aaaa", t + Duration::from_secs(1));
        assert!(!files_match(src.path(), dest.path(), "cam.avi"));

        write(src.path(), "short.bag", b"aaaa", t);
        write(dest.path(), "short.bag", b"aa", t);
        assert!(!files_match(src.path(), dest.path(), "short.bag"));
    }
}
