//! # blocksync
//!
//! zsync-style file reconstruction in pure Rust: rebuild a remote file on
//! local disk by reusing blocks from an older copy and fetching only the
//! missing byte ranges over plain HTTP.
//!
//! No special server support is required: any server that honors
//! byte-range requests works. A precomputed control describes the remote
//! file as fixed-size blocks, each summarized by a 32-bit rolling checksum
//! and a truncated MD4 digest; parsing the control file format is the
//! caller's concern.
//!
//! ## How it works
//!
//! - A [`ChecksumIndex`] maps weak checksums to candidate blocks, with the
//!   strong digest disambiguating collisions.
//! - Parallel scan workers slide a block-sized window across the local
//!   file ([`BlockSync::search_reusable_chunks`]), advancing one byte on a
//!   miss and a whole block on a hit.
//! - The [`ChunkPlanner`] deduplicates matches, derives the missing
//!   ranges, and coalesces nearby fetches into fewer requests.
//! - The assembler ([`BlockSync::sync`]) writes reused and fetched chunks
//!   in target-offset order and optionally verifies the result against the
//!   control's SHA-1.
//!
//! ## Example
//!
//! ```no_run
//! use blocksync::{BlockSync, Control};
//! use std::fs::OpenOptions;
//!
//! # fn parse_control() -> blocksync::Result<Control> { unimplemented!() }
//! # fn main() -> blocksync::Result<()> {
//! // Produced by an external control-file parser.
//! let mut control = parse_control()?;
//! control.resolve_url("http://example.com/pub/file.iso.zsync")?;
//!
//! let sync = BlockSync::new(&control)?;
//! let mut output = OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .create(true)
//!     .open("file.iso.part")
//!     .map_err(blocksync::SyncError::Output)?;
//! let stats = sync.sync("file.iso", &mut output)?;
//! println!(
//!     "reused {} bytes, fetched {} bytes in {} requests",
//!     stats.bytes_reused, stats.bytes_fetched, stats.fetch_requests
//! );
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

mod checksum;
mod control;
mod error;
mod http;
mod index;
mod plan;
mod scanner;
mod sync;
mod window;

pub use checksum::RollingChecksum;
pub use control::{Control, MAX_DIGEST_LEN, MIN_DIGEST_LEN};
pub use error::{Result, SyncError};
pub use http::HttpRangeSource;
pub use index::{BlockChecksum, ChecksumIndex};
pub use plan::{ChunkKind, ChunkPlanner, PlannedChunk};
pub use scanner::{MatchRecord, MatchStream};
pub use sync::{write_chunk, BlockSync, SyncOptions, SyncStats};
pub use window::{HashedWindow, STRONG_DIGEST_LEN};
