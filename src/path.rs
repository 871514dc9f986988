//! Path-containment resolution.
//!
//! The literal rule below is a transcription of the original C server's
//! check: reject `../`-prefixed and `/../`-containing filenames outright,
//! and require an absolute filename to begin with the base directory's own
//! path. That check alone is not a robust
//! jail — it's a string prefix test, blind to symlinks and to `.`
//! segments — so once a concrete candidate path is produced we canonicalize
//! it (or its deepest existing ancestor, for a not-yet-created WRQ target)
//! and re-assert containment with `Path::starts_with`, which is
//! component-aware rather than a byte prefix.

use std::path::{Path, PathBuf};

use crate::error::RequestError;

/// Resolve `filename`, as named in an RRQ/WRQ, to a concrete path within
/// `base`. `base` must already be an existing, canonicalizable directory.
pub fn resolve(base: &Path, filename: &str) -> Result<PathBuf, RequestError> {
    if filename.is_empty() {
        return Err(RequestError::PathRejected);
    }
    if filename.starts_with("../") || filename == ".." {
        return Err(RequestError::PathRejected);
    }
    if filename.contains("/../") {
        return Err(RequestError::PathRejected);
    }

    let candidate = if filename.starts_with('/') {
        let base_str = base.to_string_lossy();
        if !filename.starts_with(base_str.as_ref()) {
            return Err(RequestError::PathRejected);
        }
        PathBuf::from(filename)
    } else {
        base.join(filename)
    };

    let canonical_base = base
        .canonicalize()
        .map_err(RequestError::OpenFailure)?;

    if candidate.exists() {
        let canonical = candidate
            .canonicalize()
            .map_err(RequestError::OpenFailure)?;
        if !canonical.starts_with(&canonical_base) {
            return Err(RequestError::PathRejected);
        }
        Ok(canonical)
    } else {
        // WRQ target: the file doesn't exist yet. Walk up to the nearest
        // existing ancestor and assert containment there; the final
        // component(s) are the new file/subdirectories being created.
        let mut ancestor = candidate.parent();
        while let Some(a) = ancestor {
            if a.exists() {
                let canonical_ancestor = a.canonicalize().map_err(RequestError::OpenFailure)?;
                if !canonical_ancestor.starts_with(&canonical_base) {
                    return Err(RequestError::PathRejected);
                }
                return Ok(candidate);
            }
            ancestor = a.parent();
        }
        Err(RequestError::PathRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn accepts_simple_relative_file() {
        let dir = setup();
        std::fs::write(dir.path().join("foo.bin"), b"x").unwrap();
        assert!(resolve(dir.path(), "foo.bin").is_ok());
    }

    #[test]
    fn accepts_absolute_path_within_base() {
        let dir = setup();
        std::fs::write(dir.path().join("foo.bin"), b"x").unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let abs = canonical.join("foo.bin");
        let filename = abs.to_str().unwrap();
        assert!(resolve(&canonical, filename).is_ok());
    }

    #[test]
    fn rejects_dotdot_prefix() {
        let dir = setup();
        assert!(matches!(
            resolve(dir.path(), "../etc/passwd"),
            Err(RequestError::PathRejected)
        ));
    }

    #[test]
    fn rejects_embedded_dotdot() {
        let dir = setup();
        assert!(matches!(
            resolve(dir.path(), "foo/../../etc/passwd"),
            Err(RequestError::PathRejected)
        ));
    }

    #[test]
    fn rejects_unrelated_absolute_path() {
        let dir = setup();
        assert!(matches!(
            resolve(dir.path(), "/etc/passwd"),
            Err(RequestError::PathRejected)
        ));
    }

    #[test]
    fn accepts_new_file_for_write_request() {
        let dir = setup();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(resolve(&canonical, "new_upload.bin").is_ok());
    }

    #[test]
    fn accepts_new_file_in_new_subdirectory() {
        let dir = setup();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(resolve(&canonical, "sub/dir/new.bin").is_ok());
    }

    #[test]
    fn rejects_symlink_escaping_base() {
        let dir = setup();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"s").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link"))
                .unwrap();
            assert!(matches!(
                resolve(dir.path(), "link"),
                Err(RequestError::PathRejected)
            ));
        }
    }
}
