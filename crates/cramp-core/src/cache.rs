//! Persistent stat cache (component C2): remembers the transcoded BAM
//! size for each CRAM file so `getattr`/`readdir` don't have to run a
//! full transcode just to answer a `stat`.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

/// One cache record: the CRAM's mtime at the time it was last
/// transcoded, and the byte length of the resulting BAM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub mtime: i64,
    pub size: u64,
}

/// In-memory, disk-backed table of `CacheEntry` keyed by absolute CRAM
/// source path. Read-only after [`StatCache::read`] completes, except
/// for the full rewrite [`StatCache::write`] performs at shutdown and the
/// targeted [`StatCache::remove`]/[`StatCache::put`] pair a live session
/// uses to refresh a single stale entry.
#[derive(Debug, Default)]
pub struct StatCache {
    entries: HashMap<PathBuf, CacheEntry>,
}

impl StatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` under `key`, refusing to overwrite an existing
    /// entry. Callers that need to replace a stale record must
    /// [`StatCache::remove`] it first.
    pub fn put(&mut self, key: PathBuf, record: CacheEntry) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, record);
        true
    }

    pub fn get(&self, key: &Path) -> Option<CacheEntry> {
        self.entries.get(key).copied()
    }

    /// Evict an entry so a subsequent `put` can install a fresh one.
    /// Used to re-populate a stale record after a full transcode: `put`
    /// alone refuses to overwrite, so the caller must `remove` first
    /// when the source mtime has moved on.
    pub fn remove(&mut self, key: &Path) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decide the size to report for a virtual BAM: the cached size when
    /// present, non-zero, and not older than `source_mtime`; otherwise
    /// `placeholder`.
    pub fn resolve_size(&self, source: &Path, source_mtime: i64, placeholder: u64) -> u64 {
        match self.get(source) {
            Some(cached) if cached.size != 0 && cached.mtime >= source_mtime => cached.size,
            _ => placeholder,
        }
    }

    /// Read cache records from `path`. A missing file is not an error --
    /// the filesystem simply starts with an empty cache. Returns the
    /// number of records admitted.
    pub fn read(&mut self, path: &Path) -> io::Result<usize> {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(?path, "no existing stat cache, starting empty");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let mut admitted = 0usize;
        for line in io::BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match parse_record(trimmed) {
                Some((source, entry)) => {
                    self.entries.insert(PathBuf::from(source), entry);
                    admitted += 1;
                }
                None => {
                    warn!(line = trimmed, "dropping malformed stat cache record");
                }
            }
        }

        debug!(admitted, "read stat cache entries");
        Ok(admitted)
    }

    /// Rewrite the cache file in full from the current in-memory state.
    pub fn write(&self, path: &Path, source_dir: &Path) -> io::Result<usize> {
        let file = fs::File::create(path)?;
        let mut out = BufWriter::new(file);

        writeln!(out, "# {}", source_dir.display())?;

        let mut written = 0usize;
        for (source, entry) in &self.entries {
            writeln!(out, "{}:{}:{}", source.display(), entry.mtime, entry.size)?;
            written += 1;
        }

        out.flush()?;
        debug!(written, "wrote stat cache entries");
        Ok(written)
    }

    /// Release all cache entries. Mostly a documentation marker in Rust
    /// (normal `Drop` already reclaims the map) but kept as an explicit
    /// call so the lifecycle (C6) shutdown path reads as one deliberate
    /// step: flush, then destroy.
    pub fn destroy(self) {
        drop(self);
    }
}

/// Parse one `source:mtime:size[:...]` record. Extra trailing fields are
/// tolerated and ignored; a record missing any of the first three fields
/// fails to parse and is dropped by the caller.
fn parse_record(line: &str) -> Option<(&str, CacheEntry)> {
    let mut parts = line.splitn(4, ':');
    let source = parts.next()?;
    let mtime: i64 = parts.next()?.parse().ok()?;
    let size: u64 = parts.next()?.parse().ok()?;
    Some((source, CacheEntry { mtime, size }))
}

/// djb2 string hash, used to derive the cache-file name from the source
/// directory path. Collisions are tolerated: the pseudo-header written
/// by [`StatCache::write`] discriminates them at load time.
pub fn djb2_hash(s: &str) -> u64 {
    let mut hash: u64 = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(b as u64);
    }
    hash
}

/// Determine the default cache directory: `$CRAMP_CACHE`, or
/// `$HOME/.cache/13amp` if unset, creating it (and each missing parent
/// under `$HOME/.cache`) if necessary.
pub fn cache_dir_init() -> io::Result<PathBuf> {
    if let Ok(dir) = std::env::var("CRAMP_CACHE") {
        return Ok(PathBuf::from(dir));
    }

    let home = std::env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME is not set"))?;

    let mut dir = home;
    for component in [".cache", "13amp"] {
        dir.push(component);
        match fs::symlink_metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists but is not a directory", dir.display()),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(&dir)?,
            Err(e) => return Err(e),
        }
    }

    Ok(dir)
}

/// Generate the cache file path for a given source directory: the
/// directory from [`cache_dir_init`] joined with the hex djb2 digest of
/// the source directory's absolute path.
pub fn cache_file_path(source: &Path) -> io::Result<PathBuf> {
    let cache_dir = cache_dir_init()?;
    let digest = djb2_hash(&source.to_string_lossy());
    Ok(cache_dir.join(format!("{digest:016x}")))
}

/// Extract a file's modification time as seconds since the epoch, the
/// unit [`CacheEntry::mtime`] and [`StatCache::resolve_size`] use.
pub fn unix_mtime(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn put_refuses_to_overwrite() {
        let mut cache = StatCache::new();
        let key = PathBuf::from("/a/b.cram");
        assert!(cache.put(key.clone(), CacheEntry { mtime: 1, size: 2 }));
        assert!(!cache.put(key.clone(), CacheEntry { mtime: 9, size: 9 }));
        assert_eq!(cache.get(&key).unwrap().size, 2);
    }

    #[test]
    fn resolve_size_prefers_fresh_cache_entry() {
        let mut cache = StatCache::new();
        let key = PathBuf::from("/a/b.cram");
        cache.put(key.clone(), CacheEntry { mtime: 100, size: 555 });

        assert_eq!(cache.resolve_size(&key, 50, 999), 555);
        // stale: source mtime has advanced past the cached mtime
        assert_eq!(cache.resolve_size(&key, 200, 999), 999);
        // cold: no entry at all
        assert_eq!(
            cache.resolve_size(Path::new("/nope"), 0, 999),
            999
        );
    }

    #[test]
    fn read_tolerates_comments_blanks_and_extra_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "# /source/dir").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "  ").unwrap();
        writeln!(f, "/source/dir/a.cram:1000:2048").unwrap();
        writeln!(f, "/source/dir/b.cram:2000:4096:future-field").unwrap();
        writeln!(f, "garbage-line-with-no-colons").unwrap();
        drop(f);

        let mut cache = StatCache::new();
        let admitted = cache.read(&path).unwrap();
        assert_eq!(admitted, 2);
        assert_eq!(
            cache.get(Path::new("/source/dir/a.cram")),
            Some(CacheEntry { mtime: 1000, size: 2048 })
        );
        assert_eq!(
            cache.get(Path::new("/source/dir/b.cram")),
            Some(CacheEntry { mtime: 2000, size: 4096 })
        );
    }

    #[test]
    fn missing_cache_file_is_not_fatal() {
        let mut cache = StatCache::new();
        let admitted = cache.read(Path::new("/does/not/exist")).unwrap();
        assert_eq!(admitted, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");

        let mut cache = StatCache::new();
        cache.put(PathBuf::from("/src/a.cram"), CacheEntry { mtime: 10, size: 20 });
        cache.put(PathBuf::from("/src/b.cram"), CacheEntry { mtime: 30, size: 40 });
        cache.write(&path, Path::new("/src")).unwrap();

        let mut reloaded = StatCache::new();
        let admitted = reloaded.read(&path).unwrap();
        assert_eq!(admitted, 2);
        assert_eq!(reloaded.get(Path::new("/src/a.cram")).unwrap().size, 20);
        assert_eq!(reloaded.get(Path::new("/src/b.cram")).unwrap().size, 40);
    }

    #[test]
    fn remove_allows_put_to_replace_a_stale_entry() {
        let mut cache = StatCache::new();
        let key = PathBuf::from("/a/b.cram");
        cache.put(key.clone(), CacheEntry { mtime: 1, size: 10 });
        assert!(!cache.put(key.clone(), CacheEntry { mtime: 2, size: 20 }));

        cache.remove(&key);
        assert!(cache.put(key.clone(), CacheEntry { mtime: 2, size: 20 }));
        assert_eq!(cache.get(&key).unwrap().size, 20);
    }

    #[test]
    fn djb2_matches_known_vector() {
        // http://www.cse.yorku.ca/~oz/hash.html worked example
        assert_eq!(djb2_hash(""), 5381);
    }
}
