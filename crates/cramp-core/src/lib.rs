//! Core, FUSE-independent pieces of cramp-fs: path mapping (C1), the
//! on-disk stat cache (C2), the CRAM->BAM transcode pipeline (C3), and
//! mount configuration.

pub mod cache;
pub mod config;
pub mod error;
pub mod paths;
pub mod transcode;

pub use cache::{CacheEntry, StatCache};
pub use config::{Config, DebugLevel};
pub use error::{CrampError, Result};
pub use paths::PathMapper;
pub use transcode::{transcode, RangeSink, Sink, SizeSink};
