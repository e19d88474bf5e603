//! Path mapping (component C1): mount-relative -> source-absolute path
//! resolution, extension predicates, and CRAM format sniffing.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use rust_htslib::htslib;

use crate::error::{CrampError, Result};

/// Concatenate two path fragments with exactly one separator between them,
/// stripping trailing separators from `a` and leading separators from `b`.
pub fn path_concat(a: &str, b: &str) -> String {
    let a = a.trim_end_matches('/');
    let b = b.trim_start_matches('/');
    format!("{a}/{b}")
}

/// True iff the last `.`-delimited suffix of `path` equals `ext` (which
/// must include the leading dot, e.g. `".cram"`). Case-sensitive.
pub fn has_extension(path: &str, ext: &str) -> bool {
    match path.rfind('.') {
        Some(idx) => &path[idx..] == ext,
        None => false,
    }
}

/// Replace the suffix from the last `.` with `ext`; if `path` has no dot,
/// `ext` is appended with no separator inserted.
pub fn sub_extension(path: &str, ext: &str) -> String {
    match path.rfind('.') {
        Some(idx) => format!("{}{ext}", &path[..idx]),
        None => format!("{path}{ext}"),
    }
}

/// Resolves mount-relative paths against a canonical source directory,
/// resolved once at construction and frozen thereafter.
#[derive(Debug, Clone)]
pub struct PathMapper {
    source: PathBuf,
}

impl PathMapper {
    /// Canonicalize `source` and freeze it as the mapper's root.
    pub fn new(source: &Path) -> io::Result<Self> {
        Ok(Self {
            source: source.canonicalize()?,
        })
    }

    pub fn source_dir(&self) -> &Path {
        &self.source
    }

    /// Prepend the configured source directory to a mount-relative path.
    pub fn source_path(&self, mount_rel: &str) -> PathBuf {
        PathBuf::from(path_concat(
            &self.source.to_string_lossy(),
            mount_rel,
        ))
    }
}

/// Open `abs_path` through the codec and report whether its detected
/// format is CRAM. Does not check that the path is a regular file or
/// symlink -- the caller must have done so.
///
/// This goes through the raw htslib binding (`hts_open`/`hts_get_format`)
/// rather than the safe `bam::Reader` wrapper, since sniffing a path's
/// format without committing to decode alignment records has no
/// safe-API equivalent in the crate.
pub fn is_cram(abs_path: &Path) -> Result<bool> {
    let cpath = CString::new(abs_path.as_os_str().as_bytes())
        .map_err(|_| CrampError::NotFound)?;
    let mode = CString::new("r").expect("static mode string");

    unsafe {
        let fp = htslib::hts_open(cpath.as_ptr(), mode.as_ptr());
        if fp.is_null() {
            return Err(CrampError::Io(io::Error::last_os_error()));
        }

        let fmt = htslib::hts_get_format(fp);
        let is_cram = !fmt.is_null() && (*fmt).format == htslib::htsExactFormat_cram;

        if htslib::hts_close(fp) != 0 {
            return Err(CrampError::Io(io::Error::last_os_error()));
        }

        Ok(is_cram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_concat_strips_separators() {
        assert_eq!(path_concat("/a/", "/b"), "/a/b");
        assert_eq!(path_concat("/a", "b"), "/a/b");
        assert_eq!(path_concat("/a///", "///b"), "/a/b");
    }

    #[test]
    fn has_extension_matches_last_suffix() {
        assert!(has_extension("f.cram", ".cram"));
        assert!(!has_extension("fcram", ".cram"));
        assert!(!has_extension("f.cram", ".bam"));
        assert!(has_extension("a.b.cram", ".cram"));
    }

    #[test]
    fn sub_extension_replaces_or_appends() {
        assert_eq!(sub_extension("f.cram", ".bam"), "f.bam");
        assert_eq!(sub_extension("f", ".bam"), "f.bam");
        assert_eq!(sub_extension("a.b.cram", ".bam"), "a.b.bam");
    }

    #[test]
    fn mapper_resolves_against_canonical_source() {
        let tmp = tempfile::tempdir().unwrap();
        let mapper = PathMapper::new(tmp.path()).unwrap();
        let resolved = mapper.source_path("/foo/bar.bam");
        assert_eq!(
            resolved,
            tmp.path().canonicalize().unwrap().join("foo/bar.bam")
        );
    }
}
