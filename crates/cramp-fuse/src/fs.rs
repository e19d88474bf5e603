//! Lifecycle (component C6) and the `fuse_mt::FilesystemMT` binding that
//! ties the path mapper, stat cache, overlay and transcode pipeline
//! together into a mountable filesystem.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use fuse_mt::{
    CallbackResult, FilesystemMT, RequestInfo, ResultData, ResultEmpty, ResultEntry, ResultOpen,
    ResultReaddir, ResultSlice,
};
use tracing::{info, warn};

use cramp_core::cache::unix_mtime;
use cramp_core::paths::sub_extension;
use cramp_core::{paths, transcode, CacheEntry, Config, PathMapper, RangeSink, StatCache};

use crate::overlay;
use crate::session::FileSession;

/// Attribute cache TTL handed back to the kernel. Kept short because a
/// virtual BAM's size can change the moment its CRAM is re-transcoded.
const ATTR_TTL: Duration = Duration::from_secs(1);

pub struct CrampFs {
    mapper: PathMapper,
    cache: RwLock<StatCache>,
    cache_path: PathBuf,
    bamsize: u64,
    sessions: Mutex<HashMap<u64, FileSession>>,
    next_fh: AtomicU64,
}

impl CrampFs {
    pub fn new(config: &Config) -> io::Result<Self> {
        let mapper = PathMapper::new(&config.source)?;
        let mut cache = StatCache::new();
        match cache.read(&config.cache_path) {
            Ok(n) => info!(entries = n, path = %config.cache_path.display(), "loaded stat cache"),
            Err(e) => warn!(error = %e, path = %config.cache_path.display(), "stat cache unreadable, starting empty"),
        }

        Ok(Self {
            mapper,
            cache: RwLock::new(cache),
            cache_path: config.cache_path.clone(),
            bamsize: config.bamsize,
            sessions: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        })
    }

    fn alloc_fh(&self, session: FileSession) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().unwrap().insert(fh, session);
        fh
    }

    fn take_session(&self, fh: u64) -> Option<FileSession> {
        self.sessions.lock().unwrap().remove(&fh)
    }

    /// Re-populate the stat cache from a completed transcode. The pipe
    /// is always drained to EOF regardless of the requested range, so
    /// `total_len` is the CRAM's full transcoded BAM size even when the
    /// caller only asked for a slice of it.
    fn refresh_cache_entry(&self, cram_path: &Path, total_len: u64) {
        let meta = match fs::metadata(cram_path) {
            Ok(m) => m,
            Err(_) => return,
        };
        let mtime = unix_mtime(&meta);

        let mut cache = self.cache.write().expect("stat cache lock poisoned");
        if cache.get(cram_path).map(|e| (e.mtime, e.size)) != Some((mtime, total_len)) {
            cache.remove(cram_path);
            cache.put(cram_path.to_path_buf(), CacheEntry { mtime, size: total_len });
        }
    }
}

fn errno(e: io::Error) -> libc::c_int {
    e.raw_os_error().unwrap_or(libc::EIO)
}

impl FilesystemMT for CrampFs {
    fn init(&self, _req: RequestInfo) -> ResultEmpty {
        info!(
            source = %self.mapper.source_dir().display(),
            cache = %self.cache_path.display(),
            bamsize = self.bamsize,
            "mounted"
        );
        Ok(())
    }

    fn destroy(&self) {
        let cache = self.cache.read().expect("stat cache lock poisoned");
        match cache.write(&self.cache_path, self.mapper.source_dir()) {
            Ok(n) => info!(entries = n, "flushed stat cache"),
            Err(e) => warn!(error = %e, "failed to flush stat cache on shutdown"),
        }
    }

    fn getattr(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>) -> ResultEntry {
        let mount_rel = path.to_string_lossy();
        let cache = self.cache.read().expect("stat cache lock poisoned");
        overlay::getattr(&self.mapper, &cache, self.bamsize, &mount_rel)
            .map(|attr| (ATTR_TTL, attr))
            .map_err(errno)
    }

    fn readlink(&self, _req: RequestInfo, path: &Path) -> ResultData {
        let src = self.mapper.source_path(&path.to_string_lossy());
        fs::read_link(&src)
            .map(|target| target.into_os_string().into_vec())
            .map_err(errno)
    }

    fn open(&self, _req: RequestInfo, path: &Path, flags: u32) -> ResultOpen {
        let mount_rel = path.to_string_lossy().into_owned();
        let src = self.mapper.source_path(&mount_rel);

        match OpenOptions::new().read(true).open(&src) {
            Ok(file) => Ok((self.alloc_fh(FileSession::Passthrough(file)), flags)),
            Err(e) if e.kind() == io::ErrorKind::NotFound && mount_rel.ends_with(".bam") => {
                let cram_path = PathBuf::from(sub_extension(&src.to_string_lossy(), ".cram"));
                match paths::is_cram(&cram_path) {
                    Ok(true) => Ok((self.alloc_fh(FileSession::CramBacked(cram_path)), flags)),
                    Ok(false) => Err(libc::ENOENT),
                    Err(e) => Err(e.as_errno()),
                }
            }
            Err(e) => Err(errno(e)),
        }
    }

    fn read(
        &self,
        _req: RequestInfo,
        _path: &Path,
        fh: u64,
        offset: u64,
        size: u32,
        callback: impl FnOnce(ResultSlice<'_>) -> CallbackResult,
    ) -> CallbackResult {
        let sessions = self.sessions.lock().expect("session table lock poisoned");
        let session = match sessions.get(&fh) {
            Some(s) => s,
            None => return callback(Err(libc::EBADF)),
        };

        match session {
            FileSession::Passthrough(file) => {
                use std::os::unix::fs::FileExt;
                let mut buf = vec![0u8; size as usize];
                match file.read_at(&mut buf, offset) {
                    Ok(n) => {
                        buf.truncate(n);
                        callback(Ok(&buf))
                    }
                    Err(e) => callback(Err(errno(e))),
                }
            }
            FileSession::CramBacked(cram_path) => {
                let mut sink = RangeSink::new(offset, size as usize);
                match transcode::transcode(cram_path, &mut sink) {
                    Ok(()) => {
                        self.refresh_cache_entry(cram_path, sink.total_len());
                        let bytes = sink.into_bytes();
                        callback(Ok(&bytes))
                    }
                    Err(e) => callback(Err(e.as_errno())),
                }
            }
        }
    }

    fn release(
        &self,
        _req: RequestInfo,
        _path: &Path,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> ResultEmpty {
        self.take_session(fh);
        Ok(())
    }

    fn opendir(&self, _req: RequestInfo, _path: &Path, flags: u32) -> ResultOpen {
        Ok((0, flags))
    }

    fn readdir(&self, _req: RequestInfo, path: &Path, _fh: u64) -> ResultReaddir {
        let mount_rel = path.to_string_lossy();
        overlay::readdir(&self.mapper, &mount_rel).map_err(errno)
    }

    fn releasedir(&self, _req: RequestInfo, _path: &Path, _fh: u64, _flags: u32) -> ResultEmpty {
        Ok(())
    }
}

/// Mount `fs` at `mountpoint`, dispatching callbacks across `threads`
/// worker threads unless `threads == 1` (the `-s` single-threaded mode).
pub fn mount(fs: CrampFs, mountpoint: &Path, threads: usize) -> io::Result<()> {
    let options: Vec<&OsStr> = vec![OsStr::new("-o"), OsStr::new("ro,fsname=cramp")];
    fuse_mt::mount(fuse_mt::FuseMT::new(fs, threads), mountpoint, &options)
}
