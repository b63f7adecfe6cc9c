//! End-to-end reconstruction: scan, plan, fetch, assemble.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use sha1::{Digest, Sha1};
use tracing::debug;

use crate::control::Control;
use crate::error::{Result, SyncError};
use crate::http::HttpRangeSource;
use crate::index::ChecksumIndex;
use crate::plan::{ChunkKind, ChunkPlanner, PlannedChunk};
use crate::scanner::{self, MatchStream};

/// Tunables for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upper bound on scan workers; defaults to the available parallelism.
    pub max_workers: Option<usize>,
    /// Bounded match-channel capacity per worker.
    pub channel_capacity: usize,
    /// Fetches separated by fewer than this many blocks are merged into a
    /// single range request; the separation is refetched instead of reused.
    pub coalesce_gap_blocks: u64,
    /// Verify the output against the control's SHA-1 when it carries one.
    pub verify_sha1: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_workers: None,
            channel_capacity: 4,
            coalesce_gap_blocks: 64,
            verify_sha1: true,
        }
    }
}

/// Totals from a completed sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Bytes copied from the local file.
    pub bytes_reused: u64,
    /// Bytes downloaded from the remote URL.
    pub bytes_fetched: u64,
    /// Number of reuse chunks written.
    pub reuse_chunks: usize,
    /// Number of HTTP range requests issued.
    pub fetch_requests: usize,
}

impl SyncStats {
    /// Fraction of the output served from the local file (0.0 - 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.bytes_reused + self.bytes_fetched;
        if total == 0 {
            return 1.0;
        }
        self.bytes_reused as f64 / total as f64
    }
}

/// Reconstruction engine: discovers reusable blocks in a local file and
/// fetches the rest of the remote file over HTTP ranges.
///
/// # Example
///
/// ```no_run
/// use blocksync::{BlockSync, Control};
/// use std::io::Cursor;
///
/// # fn main() -> blocksync::Result<()> {
/// // The control comes from an external parser.
/// let control = Control {
///     block_size: 2048,
///     file_length: 0,
///     url: "http://example.com/file.iso".to_string(),
///     sha1: None,
///     digest_len: 8,
///     checksums: Vec::new(),
/// };
///
/// let sync = BlockSync::new(&control)?;
/// let mut output = Cursor::new(Vec::new());
/// let stats = sync.sync("file.iso.old", &mut output)?;
/// println!("reused {:.0}%", stats.reuse_ratio() * 100.0);
/// # Ok(())
/// # }
/// ```
pub struct BlockSync {
    block_size: usize,
    remote_size: u64,
    url: String,
    sha1: Option<String>,
    index: Arc<ChecksumIndex>,
    options: SyncOptions,
}

impl BlockSync {
    /// Create an engine from a control with default options.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidControl`] when the control fails
    /// validation.
    pub fn new(control: &Control) -> Result<Self> {
        Self::with_options(control, SyncOptions::default())
    }

    /// Create an engine from a control with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidControl`] when the control fails
    /// validation.
    pub fn with_options(control: &Control, options: SyncOptions) -> Result<Self> {
        control.validate()?;
        Ok(Self {
            block_size: control.block_size,
            remote_size: control.file_length,
            url: control.url.clone(),
            sha1: control.sha1.clone(),
            index: Arc::new(control.index()),
            options,
        })
    }

    /// Block size from the control.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Remote file length from the control.
    #[must_use]
    pub const fn remote_size(&self) -> u64 {
        self.remote_size
    }

    /// Remote file URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Scan the local file for windows matching remote blocks.
    ///
    /// Exposed for testing and custom pipelines; [`BlockSync::sync`] drives
    /// it internally.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Local`] when the file cannot be inspected;
    /// per-worker errors surface through the stream items.
    pub fn search_reusable_chunks(&self, local_path: impl AsRef<Path>) -> Result<MatchStream> {
        let workers = self.options.max_workers.unwrap_or_else(|| {
            thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        });
        scanner::scan(
            local_path.as_ref(),
            self.block_size,
            self.remote_size,
            Arc::clone(&self.index),
            workers,
            self.options.channel_capacity,
        )
    }

    /// Scan the local file and produce the ordered fetch/reuse plan.
    ///
    /// # Errors
    ///
    /// Returns the first scan-worker error, or
    /// [`SyncError::PlanInvariant`] on a planner bug.
    pub fn plan(&self, local_path: impl AsRef<Path>) -> Result<Vec<PlannedChunk>> {
        let mut planner = ChunkPlanner::new(self.remote_size, self.min_gap());
        for record in self.search_reusable_chunks(local_path)? {
            planner.add(record?);
        }
        debug!(matches = planner.match_count(), "scan complete");
        planner.plan()
    }

    /// Reconstruct the remote file into `output`.
    ///
    /// Chunks are written in target-offset order: reused spans are copied
    /// from the local file, missing spans are fetched with one range
    /// request each. When the control carries a SHA-1 and verification is
    /// enabled, the digest of the assembled output is checked before
    /// returning.
    ///
    /// # Errors
    ///
    /// Any error from scanning, planning, fetching, or writing; see
    /// [`SyncError`]. The output is left in an unspecified state on error.
    pub fn sync<W: Write + Seek>(
        &self,
        local_path: impl AsRef<Path>,
        output: &mut W,
    ) -> Result<SyncStats> {
        let local_path = local_path.as_ref();
        let plan = self.plan(local_path)?;

        let mut local = File::open(local_path).map_err(SyncError::Local)?;
        let mut remote = HttpRangeSource::new(self.url.clone(), self.remote_size);
        // The plan is a sorted partition of the output, so bytes are
        // written strictly in order and the digest can be folded in as
        // they stream past.
        let mut hasher = match (&self.sha1, self.options.verify_sha1) {
            (Some(_), true) => Some(Sha1::new()),
            _ => None,
        };

        let mut stats = SyncStats::default();
        for chunk in &plan {
            match chunk.kind {
                ChunkKind::Reuse => {
                    copy_chunk(&mut local, output, chunk, hasher.as_mut())?;
                    stats.bytes_reused += chunk.size;
                    stats.reuse_chunks += 1;
                }
                ChunkKind::Fetch => {
                    remote
                        .seek(SeekFrom::Start(chunk.target_offset))
                        .map_err(SyncError::from_source_read)?;
                    remote.request(chunk.size)?;
                    copy_chunk(&mut remote, output, chunk, hasher.as_mut())?;
                    stats.bytes_fetched += chunk.size;
                    stats.fetch_requests += 1;
                }
            }
        }
        output.flush().map_err(SyncError::Output)?;

        if let (Some(hasher), Some(expected)) = (hasher, &self.sha1) {
            let actual = hex_string(&hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(SyncError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        debug!(
            bytes_reused = stats.bytes_reused,
            bytes_fetched = stats.bytes_fetched,
            fetch_requests = stats.fetch_requests,
            "sync complete"
        );
        Ok(stats)
    }

    fn min_gap(&self) -> u64 {
        self.options.coalesce_gap_blocks * self.block_size as u64
    }
}

/// Copy one chunk from `source` into `target` at its target offset.
///
/// When `source` ends before `chunk.size` bytes are delivered, the
/// remainder is filled with zeros: the checksums of a remote file's final
/// block cover a zero-padded window, so a match may extend past the end of
/// the local file.
///
/// # Errors
///
/// Read failures are classified by [`SyncError::from_source_read`]; seek
/// and write failures on `target` are [`SyncError::Output`].
pub fn write_chunk<R, W>(source: &mut R, target: &mut W, chunk: &PlannedChunk) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    copy_chunk(source, target, chunk, None)
}

fn copy_chunk<R, W>(
    source: &mut R,
    target: &mut W,
    chunk: &PlannedChunk,
    mut hasher: Option<&mut Sha1>,
) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    source
        .seek(SeekFrom::Start(chunk.source_offset))
        .map_err(SyncError::from_source_read)?;
    target
        .seek(SeekFrom::Start(chunk.target_offset))
        .map_err(SyncError::Output)?;

    let mut buf = [0u8; 64 * 1024];
    let mut remaining = chunk.size;
    while remaining > 0 {
        #[allow(clippy::cast_possible_truncation)]
        let want = buf.len().min(remaining as usize);
        let n = match source.read(&mut buf[..want]) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(SyncError::from_source_read(err)),
        };
        if n == 0 {
            break;
        }
        target.write_all(&buf[..n]).map_err(SyncError::Output)?;
        if let Some(hasher) = hasher.as_deref_mut() {
            hasher.update(&buf[..n]);
        }
        remaining -= n as u64;
    }

    if remaining > 0 {
        // Short source: the matched window ran off the end of the file.
        let zeros = [0u8; 4096];
        while remaining > 0 {
            #[allow(clippy::cast_possible_truncation)]
            let n = zeros.len().min(remaining as usize);
            target.write_all(&zeros[..n]).map_err(SyncError::Output)?;
            if let Some(hasher) = hasher.as_deref_mut() {
                hasher.update(&zeros[..n]);
            }
            remaining -= n as u64;
        }
    }
    Ok(())
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reuse_chunk(source: u64, target: u64, size: u64) -> PlannedChunk {
        PlannedChunk {
            kind: ChunkKind::Reuse,
            source_offset: source,
            target_offset: target,
            size,
        }
    }

    #[test]
    fn write_chunk_copies_at_target_offset() {
        let mut source = Cursor::new(b"0123456789".to_vec());
        let mut target = Cursor::new(vec![0u8; 10]);
        write_chunk(&mut source, &mut target, &reuse_chunk(2, 4, 3)).unwrap();
        assert_eq!(target.get_ref(), b"\0\0\0\0234\0\0\0");
    }

    #[test]
    fn write_chunk_zero_pads_short_source() {
        // The source ends 4 bytes into a 10-byte chunk; the tail must be
        // zeros, mirroring the zero-padded window the match came from.
        let mut source = Cursor::new(b"abcdef".to_vec());
        let mut target = Cursor::new(Vec::new());
        write_chunk(&mut source, &mut target, &reuse_chunk(2, 0, 10)).unwrap();
        assert_eq!(target.get_ref(), b"cdef\0\0\0\0\0\0");
    }

    #[test]
    fn write_chunk_source_entirely_past_eof() {
        let mut source = Cursor::new(b"ab".to_vec());
        let mut target = Cursor::new(Vec::new());
        write_chunk(&mut source, &mut target, &reuse_chunk(5, 0, 4)).unwrap();
        assert_eq!(target.get_ref(), b"\0\0\0\0");
    }

    #[test]
    fn write_chunk_empty_chunk_is_noop() {
        let mut source = Cursor::new(b"abc".to_vec());
        let mut target = Cursor::new(Vec::new());
        write_chunk(&mut source, &mut target, &reuse_chunk(0, 0, 0)).unwrap();
        assert!(target.get_ref().is_empty());
    }

    #[test]
    fn hasher_sees_written_bytes_including_padding() {
        let mut source = Cursor::new(b"ab".to_vec());
        let mut target = Cursor::new(Vec::new());
        let mut hasher = Sha1::new();
        copy_chunk(&mut source, &mut target, &reuse_chunk(0, 0, 4), Some(&mut hasher)).unwrap();

        let expected = Sha1::digest(b"ab\0\0");
        assert_eq!(hasher.finalize(), expected);
    }

    #[test]
    fn hex_string_formats_lowercase() {
        assert_eq!(hex_string(&[0x00, 0xab, 0x1f]), "00ab1f");
    }

    #[test]
    fn stats_reuse_ratio() {
        let stats = SyncStats {
            bytes_reused: 75,
            bytes_fetched: 25,
            reuse_chunks: 3,
            fetch_requests: 1,
        };
        assert!((stats.reuse_ratio() - 0.75).abs() < f64::EPSILON);
        assert!((SyncStats::default().reuse_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_options() {
        let options = SyncOptions::default();
        assert_eq!(options.channel_capacity, 4);
        assert_eq!(options.coalesce_gap_blocks, 64);
        assert!(options.verify_sha1);
        assert!(options.max_workers.is_none());
    }

    #[test]
    fn engine_rejects_invalid_control() {
        let control = Control {
            block_size: 0,
            file_length: 0,
            url: String::new(),
            sha1: None,
            digest_len: 8,
            checksums: Vec::new(),
        };
        assert!(matches!(
            BlockSync::new(&control),
            Err(SyncError::InvalidControl(_))
        ));
    }

    #[test]
    fn engine_exposes_control_fields() {
        let control = Control {
            block_size: 2048,
            file_length: 4096,
            url: "http://example.com/f".to_string(),
            sha1: None,
            digest_len: 8,
            checksums: vec![(1, vec![0u8; 8]), (2, vec![1u8; 8])],
        };
        let sync = BlockSync::new(&control).unwrap();
        assert_eq!(sync.block_size(), 2048);
        assert_eq!(sync.remote_size(), 4096);
        assert_eq!(sync.url(), "http://example.com/f");
    }
}
