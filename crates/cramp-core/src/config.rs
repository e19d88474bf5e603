//! Mount configuration: the immutable set of values derived from CLI
//! arguments and environment variables once, at startup, and handed
//! down to the filesystem for the life of the mount. Everything that
//! varies per-mount lives here as a plain value; the one piece of state
//! that mutates during the mount -- the stat cache -- is owned
//! separately by the filesystem (see `cramp-fuse`).

use std::io;
use std::path::{Path, PathBuf};

use crate::cache::cache_dir_init;

/// The `-d`/`--debug*` option set, kept as plain booleans rather than a
/// packed integer since nothing else consumes the bit pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugLevel {
    /// `-d` / `--debug-all`: everything below, plus libfuse's own trace.
    pub all: bool,
    /// `--debug`: this crate's own verbose tracing only.
    pub cramp: bool,
    /// libfuse's `-d`-equivalent trace, when requested independently.
    pub fuse: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical absolute path to the directory of real CRAM files.
    pub source: PathBuf,
    /// Path to the on-disk stat cache file for this source directory.
    pub cache_path: PathBuf,
    /// Placeholder size reported for a virtual BAM with no usable cache
    /// entry yet, before the first transcode has run.
    pub bamsize: u64,
    pub debug: DebugLevel,
    /// `-s`: force single-threaded FUSE dispatch.
    pub one_thread: bool,
    /// `-f`: stay in the foreground instead of daemonizing.
    pub foreground: bool,
}

impl Config {
    /// Resolve a `Config` from explicit CLI values. `cache` is a literal
    /// file path override (`--cache=FILE`), used as-is; when absent, the
    /// cache path is derived from `$CRAMP_CACHE`/`$HOME/.cache/13amp`
    /// joined with the source directory's digest.
    pub fn resolve(
        source: &Path,
        cache: Option<&Path>,
        bamsize: u64,
        debug: DebugLevel,
        one_thread: bool,
        foreground: bool,
    ) -> io::Result<Self> {
        let source = source.canonicalize()?;
        let cache_path = match cache {
            Some(file) => file.to_path_buf(),
            None => {
                let cache_dir = cache_dir_init()?;
                let digest = crate::cache::djb2_hash(&source.to_string_lossy());
                cache_dir.join(format!("{digest:016x}"))
            }
        };

        Ok(Self {
            source,
            cache_path,
            bamsize,
            debug,
            one_thread,
            foreground,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_uses_explicit_cache_file_path_as_is() {
        let source_tmp = tempfile::tempdir().unwrap();
        let cache_tmp = tempfile::tempdir().unwrap();
        let cache_file = cache_tmp.path().join("my-cache");

        let cfg = Config::resolve(
            source_tmp.path(),
            Some(&cache_file),
            4096,
            DebugLevel::default(),
            false,
            false,
        )
        .unwrap();

        assert_eq!(cfg.source, source_tmp.path().canonicalize().unwrap());
        assert_eq!(cfg.cache_path, cache_file);
        assert_eq!(cfg.bamsize, 4096);
    }

    #[test]
    fn resolve_derives_cache_path_by_digest_when_unset() {
        let source_tmp = tempfile::tempdir().unwrap();

        std::env::set_var("CRAMP_CACHE", source_tmp.path());
        let cfg = Config::resolve(
            source_tmp.path(),
            None,
            4096,
            DebugLevel::default(),
            false,
            false,
        )
        .unwrap();
        std::env::remove_var("CRAMP_CACHE");

        assert!(cfg.cache_path.starts_with(source_tmp.path()));
        assert_ne!(cfg.cache_path, source_tmp.path());
    }
}
