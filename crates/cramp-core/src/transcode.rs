//! Transcode pipeline (component C3): drives a CRAM decoder into a BAM
//! encoder whose output stream is piped straight into a caller-supplied
//! sink, without ever touching disk.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::thread;

use rust_htslib::bam::{self, Read as _};

use crate::error::{CrampError, Result};

/// A consumer of the transcoded BAM byte stream. Implementations decide
/// what to do with each block as it arrives; the pipeline guarantees
/// blocks are delivered in strict BAM-stream order.
pub trait Sink {
    fn consume(&mut self, block: &[u8]);
}

/// Discards data, accumulating only the total byte count: the
/// transcoded BAM's length, with none of it retained.
#[derive(Debug, Default)]
pub struct SizeSink {
    count: u64,
}

impl SizeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_size(self) -> u64 {
        self.count
    }
}

impl Sink for SizeSink {
    fn consume(&mut self, block: &[u8]) {
        self.count += block.len() as u64;
    }
}

/// Extracts the byte range `[from, from + want)` of the transcoded
/// stream, draining the rest of the stream so the producer is never
/// left blocked on a full pipe.
#[derive(Debug)]
pub struct RangeSink {
    from: u64,
    want: usize,
    cursor: u64,
    out: Vec<u8>,
}

impl RangeSink {
    pub fn new(from: u64, want: usize) -> Self {
        Self {
            from,
            want,
            cursor: 0,
            out: Vec::with_capacity(want.min(1 << 20)),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    /// Total length of the transcoded stream observed so far. The pipe
    /// is always drained to EOF regardless of the requested window, so
    /// once `transcode` returns this is the CRAM's full transcoded BAM
    /// size -- a free byproduct callers use to refresh the stat cache.
    pub fn total_len(&self) -> u64 {
        self.cursor
    }
}

impl Sink for RangeSink {
    fn consume(&mut self, block: &[u8]) {
        let block_start = self.cursor;
        let block_end = block_start + block.len() as u64;
        self.cursor = block_end;

        if self.out.len() >= self.want {
            return;
        }

        let want_end = self.from + self.want as u64;
        let overlap_start = block_start.max(self.from);
        let overlap_end = block_end.min(want_end);
        if overlap_start < overlap_end {
            let rel_start = (overlap_start - block_start) as usize;
            let rel_end = (overlap_end - block_start) as usize;
            self.out.extend_from_slice(&block[rel_start..rel_end]);
        }
    }
}

/// Closes a raw fd exactly once when dropped, whichever path out of the
/// producer closure is taken (success, decode error, or encoder-open
/// failure).
struct OwnedFd(RawFd);

impl Drop for OwnedFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

fn create_pipe() -> Result<(RawFd, RawFd)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(CrampError::Io(io::Error::last_os_error()));
    }
    Ok((fds[0], fds[1]))
}

fn codec_err(path: &Path, source: rust_htslib::errors::Error) -> CrampError {
    CrampError::Codec {
        path: path.display().to_string(),
        source,
    }
}

/// Run the decoder -> encoder -> sink pipeline for `cram_path`,
/// transcoding the whole file every time -- there is no attempt to
/// resume a partial decode from a previous read. Returns once the
/// producer and consumer have both finished.
///
/// The BAM encoder is bound to the pipe by opening it against the
/// `/dev/fd/<n>` path of the pipe's write end, rather than dup2-ing over
/// the process' stdout or reaching into the codec's internal fd slot --
/// see DESIGN.md for the tradeoffs.
pub fn transcode(cram_path: &Path, sink: &mut dyn Sink) -> Result<()> {
    let (read_fd, write_fd) = create_pipe()?;
    // Both ends are wrapped in their owning guards before `spawn`, so if
    // `spawn` itself fails the closure below is dropped unexecuted right
    // here and `write_guard`'s `Drop` still runs -- neither fd leaks.
    let mut pipe_reader = unsafe { File::from_raw_fd(read_fd) };
    let write_guard = OwnedFd(write_fd);
    let cram_path_owned: PathBuf = cram_path.to_path_buf();

    let producer = thread::Builder::new()
        .name("cramp-transcode-producer".into())
        .spawn(move || -> Result<()> {
            let _our_write_end = write_guard;

            let mut reader = bam::Reader::from_path(&cram_path_owned)
                .map_err(|e| codec_err(&cram_path_owned, e))?;
            let header = bam::Header::from_template(reader.header());

            let writer_path = format!("/dev/fd/{write_fd}");
            let mut writer = bam::Writer::from_path(&writer_path, &header, bam::Format::Bam)
                .map_err(|e| codec_err(Path::new(&writer_path), e))?;

            for record in reader.records() {
                let record = record.map_err(|e| codec_err(&cram_path_owned, e))?;
                if writer.write(&record).is_err() {
                    // Encoder write failure: break cleanly, the consumer
                    // keeps draining whatever was already written.
                    break;
                }
            }

            drop(writer);
            Ok(())
        })
        .map_err(|e| CrampError::Io(io::Error::other(e)))?;

    let mut buf = vec![0u8; libc::PIPE_BUF];
    let mut read_err = None;

    loop {
        match pipe_reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => sink.consume(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Stop reading and drop our end so the producer sees
                // EPIPE on its next write instead of blocking forever.
                read_err = Some(e);
                break;
            }
        }
    }
    drop(pipe_reader);

    let producer_result = producer
        .join()
        .map_err(|_| CrampError::Io(io::Error::other("transcode producer thread panicked")))?;

    if let Some(e) = read_err {
        return Err(CrampError::Io(e));
    }
    producer_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_sink_accumulates_lengths() {
        let mut sink = SizeSink::new();
        sink.consume(b"hello ");
        sink.consume(b"world");
        assert_eq!(sink.into_size(), 11);
    }

    #[test]
    fn range_sink_extracts_overlap_across_blocks() {
        let mut sink = RangeSink::new(3, 4);
        sink.consume(b"0123456789");
        assert_eq!(sink.into_bytes(), b"3456");
    }

    #[test]
    fn range_sink_handles_window_split_across_two_blocks() {
        let mut sink = RangeSink::new(8, 6);
        sink.consume(b"01234567");
        sink.consume(b"89ABCDEF");
        assert_eq!(sink.into_bytes(), b"89ABCD");
    }

    #[test]
    fn range_sink_ignores_blocks_entirely_outside_window() {
        let mut sink = RangeSink::new(100, 10);
        sink.consume(b"0123456789");
        assert!(sink.into_bytes().is_empty());
    }
}
