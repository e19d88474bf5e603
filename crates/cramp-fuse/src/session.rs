//! Open file session (component C5's data model): a tagged union of
//! "passthrough fd" vs "CRAM-backed virtual BAM", keyed by the opaque
//! file handle `fuse_mt` hands back to us on every subsequent call.
//!
//! The CRAM-backed case stores the resolved absolute `.cram` path
//! rather than a live decoder handle. Every read restarts the transcode
//! from the CRAM header regardless (see the transcode pipeline's
//! explicit non-performance-goal caveat), so there is no decoder state
//! worth keeping open between reads, and a path is trivially `Send`
//! across the pipeline's producer thread where a `bam::Reader` is not.

use std::fs::File;
use std::path::PathBuf;

pub enum FileSession {
    Passthrough(File),
    CramBacked(PathBuf),
}
