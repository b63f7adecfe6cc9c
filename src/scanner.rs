//! Parallel scan of the local file for reusable blocks.
//!
//! The file is split into contiguous block-aligned ranges, one per worker.
//! Each worker opens its own handle and slides a block-sized window over
//! its range: miss advances one byte, hit emits a record for every matching
//! target block and advances a whole block. Records flow through a bounded
//! channel, which applies backpressure when the consumer lags.

use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::index::ChecksumIndex;
use crate::window::HashedWindow;

/// A window of the local file whose contents equal a block of the remote
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Byte offset in the local file where the matched window begins.
    pub source_offset: u64,
    /// Byte offset of the matched block in the remote file.
    pub target_offset: u64,
    /// Usable bytes: the block size, except the final remote block which
    /// may be shorter.
    pub size: u64,
}

/// Stream of records produced by the scan workers.
///
/// Iteration yields records in no particular order across workers; within
/// one worker, source offsets increase. The stream ends when every worker
/// has finished. Dropping it early signals the workers to stop.
///
/// # Example
///
/// ```no_run
/// use blocksync::{BlockSync, Control};
///
/// # fn parse_control() -> blocksync::Result<Control> { unimplemented!() }
/// # fn main() -> blocksync::Result<()> {
/// let sync = BlockSync::new(&parse_control()?)?;
/// for record in sync.search_reusable_chunks("file.iso.old")? {
///     let record = record?;
///     println!("{} -> {}", record.source_offset, record.target_offset);
/// }
/// # Ok(())
/// # }
/// ```
pub struct MatchStream {
    rx: Receiver<Result<MatchRecord>>,
    cancel: Arc<AtomicBool>,
}

impl Iterator for MatchStream {
    type Item = Result<MatchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

impl Drop for MatchStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// Spawn scan workers over `path` and return the record stream.
///
/// # Arguments
///
/// * `path` - Local file to scan
/// * `block_size` - Window and hit-skip size in bytes
/// * `remote_size` - Remote file length, used to clip the final block
/// * `index` - Checksum table shared read-only across workers
/// * `max_workers` - Upper bound on worker threads
/// * `capacity_per_worker` - Bounded channel slots per worker
pub(crate) fn scan(
    path: &Path,
    block_size: usize,
    remote_size: u64,
    index: Arc<ChecksumIndex>,
    max_workers: usize,
    capacity_per_worker: usize,
) -> Result<MatchStream> {
    let local_size = fs::metadata(path).map_err(SyncError::Local)?.len();
    let block = block_size as u64;
    let local_blocks = local_size.div_ceil(block);

    #[allow(clippy::cast_possible_truncation)]
    let workers = max_workers
        .min(local_blocks as usize)
        .max(1);
    let blocks_per_worker = local_blocks / workers as u64;

    let (tx, rx) = bounded(capacity_per_worker.max(1) * workers);
    let cancel = Arc::new(AtomicBool::new(false));
    debug!(workers, local_size, "scanning local file");

    for i in 0..workers as u64 {
        let begin = i * blocks_per_worker * block;
        let end = if i == workers as u64 - 1 {
            local_size
        } else {
            ((i + 1) * blocks_per_worker * block).min(local_size)
        };
        let worker = ScanWorker {
            path: path.to_path_buf(),
            begin,
            end,
            block_size,
            remote_size,
            index: Arc::clone(&index),
            tx: tx.clone(),
            cancel: Arc::clone(&cancel),
        };
        thread::spawn(move || worker.run());
    }
    // The workers hold the only remaining senders; the channel closes when
    // the last one finishes.
    drop(tx);

    Ok(MatchStream { rx, cancel })
}

struct ScanWorker {
    path: PathBuf,
    begin: u64,
    end: u64,
    block_size: usize,
    remote_size: u64,
    index: Arc<ChecksumIndex>,
    tx: Sender<Result<MatchRecord>>,
    cancel: Arc<AtomicBool>,
}

impl ScanWorker {
    fn run(self) {
        if let Err(err) = self.scan_range() {
            let _ = self.tx.send(Err(err));
        }
    }

    fn scan_range(&self) -> Result<()> {
        let file = File::open(&self.path).map_err(SyncError::Local)?;
        let mut input = BufReader::new(file);
        input
            .seek(SeekFrom::Start(self.begin))
            .map_err(SyncError::Local)?;

        let block = self.block_size as u64;
        let mut window = HashedWindow::new(self.block_size);
        let mut offset = self.begin;
        // How many bytes to consume next: a full window initially and
        // after every hit, a single byte otherwise.
        let mut step = block;

        while offset < self.end {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(());
            }

            let filled = if step == block {
                window.fill_from(&mut input)
            } else {
                window.slide_from(&mut input)
            }
            .map_err(SyncError::Local)?;
            if !filled {
                break;
            }

            step = 1;
            if let Some(candidates) = self.index.find_weak(window.weak()) {
                let digest = window.strong();
                if let Some(hits) = self.index.find_strong(candidates, &digest) {
                    for hit in hits {
                        if !self.emit(hit.block_index, offset)? {
                            return Ok(());
                        }
                    }
                    step = block;
                }
            }
            offset += step;
        }
        Ok(())
    }

    /// Send one record; returns `Ok(false)` when the receiver is gone.
    fn emit(&self, block_index: u32, source_offset: u64) -> Result<bool> {
        let block = self.block_size as u64;
        let target_offset = u64::from(block_index) * block;
        // The final block's checksums cover a zero-padded window; only the
        // bytes inside the remote file are usable.
        let size = block.min(self.remote_size - target_offset);
        let record = MatchRecord {
            source_offset,
            target_offset,
            size,
        };
        Ok(self.tx.send(Ok(record)).is_ok())
    }
}
