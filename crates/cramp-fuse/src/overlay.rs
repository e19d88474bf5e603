//! Attribute/listing overlay (component C4): the `getattr`/`readdir`
//! semantics that make virtual BAM entries appear beside their source
//! CRAM files without ever touching the real filesystem for them.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use fuse_mt::{DirectoryEntry, FileAttr, FileType};

use cramp_core::cache::unix_mtime;
use cramp_core::paths::{has_extension, is_cram, sub_extension};
use cramp_core::{CrampError, PathMapper, StatCache};

const WRITE_MASK: u32 = 0o222;

fn io_err(e: CrampError) -> io::Error {
    io::Error::from_raw_os_error(e.as_errno())
}

/// Translate `std::fs::Metadata` into the attribute shape `fuse_mt`
/// wants, clearing all three write bits -- the whole mount is read-only.
fn attr_from_metadata(meta: &fs::Metadata) -> FileAttr {
    use std::os::unix::fs::MetadataExt;

    let kind = if meta.is_dir() {
        FileType::Directory
    } else if meta.file_type().is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    };

    let ctime = SystemTime::UNIX_EPOCH
        + Duration::new(meta.ctime().max(0) as u64, meta.ctime_nsec().max(0) as u32);

    FileAttr {
        size: meta.size(),
        blocks: meta.blocks(),
        atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
        mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        ctime,
        crtime: SystemTime::UNIX_EPOCH,
        kind,
        perm: (meta.mode() & 0o7777 & !WRITE_MASK) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        flags: 0,
    }
}

/// `getattr(mount_rel)`: resolve against the source, falling back to the
/// underlying CRAM's attributes (with a cache-derived size) when the
/// request names a `.bam` that does not exist as a real file.
pub fn getattr(
    mapper: &PathMapper,
    cache: &StatCache,
    bamsize: u64,
    mount_rel: &str,
) -> io::Result<FileAttr> {
    let src = mapper.source_path(mount_rel);

    match fs::symlink_metadata(&src) {
        Ok(meta) => Ok(attr_from_metadata(&meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound && mount_rel.ends_with(".bam") => {
            let cram_path = PathBuf::from(sub_extension(&src.to_string_lossy(), ".cram"));
            let cram_meta = fs::metadata(&cram_path)
                .map_err(|_| io::Error::from(io::ErrorKind::NotFound))?;

            if !cram_meta.is_file() {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }

            let source_mtime = unix_mtime(&cram_meta);
            let size = cache.resolve_size(&cram_path, source_mtime, bamsize);

            let mut attr = attr_from_metadata(&cram_meta);
            attr.size = size;
            Ok(attr)
        }
        Err(e) => Err(e),
    }
}

/// `readdir(mount_rel)`: list the source directory, injecting a virtual
/// `.bam` entry beside every CRAM file that has no real same-named
/// sibling. Real entries always win a name clash, regardless of which
/// one the directory iterator produces first -- a later real entry
/// evicts an already-injected virtual one, and an already-seen real
/// entry blocks the virtual injection outright.
pub fn readdir(mapper: &PathMapper, mount_rel: &str) -> io::Result<Vec<DirectoryEntry>> {
    let src_dir = mapper.source_path(mount_rel);
    let mut accum: HashMap<String, FileType> = HashMap::new();

    for entry in fs::read_dir(&src_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;

        let kind = if file_type.is_dir() {
            FileType::Directory
        } else if file_type.is_symlink() {
            FileType::Symlink
        } else {
            FileType::RegularFile
        };

        accum.remove(&name);
        accum.insert(name.clone(), kind);

        if (file_type.is_file() || file_type.is_symlink()) && has_extension(&name, ".cram") {
            let bam_name = sub_extension(&name, ".bam");
            if !accum.contains_key(&bam_name) {
                let abs = src_dir.join(&name);
                if is_cram(&abs).map_err(io_err)? {
                    accum.insert(bam_name, kind);
                }
            }
        }
    }

    Ok(accum
        .into_iter()
        .map(|(name, kind)| DirectoryEntry {
            name: name.into(),
            kind,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    fn mapper_for(dir: &std::path::Path) -> PathMapper {
        PathMapper::new(dir).unwrap()
    }

    #[test]
    fn getattr_clears_write_bits_on_real_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut f = File::create(tmp.path().join("a.cram")).unwrap();
        writeln!(f, "not actually cram").unwrap();
        drop(f);

        let mapper = mapper_for(tmp.path());
        let cache = StatCache::new();
        let attr = getattr(&mapper, &cache, 4096, "a.cram").unwrap();
        assert_eq!(attr.perm & 0o222, 0);
    }

    #[test]
    fn getattr_not_found_for_plain_missing_bam() {
        let tmp = tempfile::tempdir().unwrap();
        let mapper = mapper_for(tmp.path());
        let cache = StatCache::new();
        let err = getattr(&mapper, &cache, 4096, "ghost.bam").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn readdir_masks_real_bam_over_virtual() {
        let tmp = tempfile::tempdir().unwrap();
        File::create(tmp.path().join("a.bam")).unwrap();
        File::create(tmp.path().join("a.cram")).unwrap();

        let mapper = mapper_for(tmp.path());
        let entries = readdir(&mapper, "").unwrap();
        let bam_count = entries
            .iter()
            .filter(|e| e.name.to_string_lossy() == "a.bam")
            .count();
        assert_eq!(bam_count, 1);
    }
}
