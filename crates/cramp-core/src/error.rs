use std::io;

/// Errors produced by the path mapper, stat cache and transcode pipeline.
///
/// Every variant carries enough information to be turned back into an
/// `errno` for a FUSE reply via [`CrampError::as_errno`].
#[derive(Debug, thiserror::Error)]
pub enum CrampError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not found")]
    NotFound,

    #[error("{path} is not a CRAM file")]
    NotCram { path: String },

    #[error("codec error opening {path}: {source}")]
    Codec {
        path: String,
        #[source]
        source: rust_htslib::errors::Error,
    },

    #[error("malformed cache record")]
    MalformedCacheRecord,
}

pub type Result<T> = std::result::Result<T, CrampError>;

impl CrampError {
    /// Map this error onto the positive `libc::E*` constant `fuser`/
    /// `fuse_mt` expect from a failed callback -- they negate it
    /// themselves before replying to the kernel.
    pub fn as_errno(&self) -> i32 {
        match self {
            CrampError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            CrampError::NotFound => libc::ENOENT,
            CrampError::NotCram { .. } => libc::ENOENT,
            CrampError::Codec { .. } => libc::EIO,
            CrampError::MalformedCacheRecord => libc::EINVAL,
        }
    }
}
