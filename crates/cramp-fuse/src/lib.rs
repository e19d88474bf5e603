//! FUSE binding for cramp-fs: the attribute/listing overlay (C4), file
//! session (C5) and lifecycle (C6) components built on `cramp-core`.

mod fs;
mod overlay;
mod session;

pub use fs::{mount, CrampFs};
