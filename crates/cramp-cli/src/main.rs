//! `cramp`: mounts a read-only FUSE filesystem that projects a source
//! directory, synthesizing a virtual BAM file beside every CRAM file it
//! finds.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use daemonize::Daemonize;
use tracing_subscriber::EnvFilter;

use cramp_core::{Config, DebugLevel};

/// Default placeholder size reported for a virtual BAM before any
/// transcode has populated the stat cache for its CRAM.
const DEFAULT_BAMSIZE: u64 = 4096;

#[derive(Parser, Debug)]
#[command(name = "cramp", version, about = "Project CRAM files as virtual BAM through a read-only FUSE mount")]
struct Cli {
    /// Directory at which to mount the filesystem.
    mountpoint: PathBuf,

    /// Source directory of real CRAM/BAM files (default: current directory).
    #[arg(short = 'S', long = "source", default_value = ".")]
    source: PathBuf,

    /// Alternative stat-cache file path (default derived from $CRAMP_CACHE/$HOME).
    #[arg(long = "cache")]
    cache: Option<PathBuf>,

    /// All debug output, including the FUSE frontend's own trace.
    #[arg(short = 'd', long = "debug-all")]
    debug_all: bool,

    /// This crate's own verbose logging; forces foreground operation.
    #[arg(long = "debug")]
    debug: bool,

    /// Stay in the foreground instead of daemonizing.
    #[arg(short = 'f')]
    foreground: bool,

    /// Force single-threaded FUSE dispatch.
    #[arg(short = 's')]
    single_threaded: bool,
}

fn init_logging(debug: DebugLevel) {
    let default_directive = if debug.all || debug.cramp { "debug" } else { "warn" };

    let filter = EnvFilter::try_from_env("CRAMP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let debug = DebugLevel {
        all: cli.debug_all,
        cramp: cli.debug || cli.debug_all,
        fuse: cli.debug_all,
    };
    let foreground = cli.foreground || cli.debug;

    if !cli.source.is_dir() {
        bail!("source directory does not exist or is not a directory: {}", cli.source.display());
    }

    let config = Config::resolve(
        &cli.source,
        cli.cache.as_deref(),
        DEFAULT_BAMSIZE,
        debug,
        cli.single_threaded,
        foreground,
    )
    .with_context(|| format!("resolving configuration for source {}", cli.source.display()))?;

    if !config.foreground {
        Daemonize::new()
            .working_directory(&config.source)
            .start()
            .context("daemonizing")?;
    }

    init_logging(debug);

    tracing::info!(
        source = %config.source.display(),
        cache = %config.cache_path.display(),
        mountpoint = %cli.mountpoint.display(),
        one_thread = config.one_thread,
        "starting cramp"
    );

    let fs = cramp_fuse::CrampFs::new(&config)
        .with_context(|| "constructing filesystem from resolved configuration")?;

    let threads = if config.one_thread { 1 } else { 4 };
    cramp_fuse::mount(fs, &cli.mountpoint, threads)
        .with_context(|| format!("mounting at {}", cli.mountpoint.display()))?;

    Ok(())
}
