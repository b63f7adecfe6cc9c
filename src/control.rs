//! Control metadata contract.
//!
//! The control file parser is an external collaborator; this module defines
//! the structure it produces and the checks the engine relies on. Block
//! checksums in a zsync control are computed over block-sized windows
//! zero-padded on the right, with the weak checksum as in
//! [`crate::RollingChecksum`] and the strong digest an MD4 prefix.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SyncError};
use crate::index::{BlockChecksum, ChecksumIndex};

/// Minimum strong-digest prefix length a control may declare.
pub const MIN_DIGEST_LEN: usize = 4;
/// Maximum strong-digest prefix length a control may declare.
pub const MAX_DIGEST_LEN: usize = 16;

/// Parsed zsync control metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Block size in bytes.
    pub block_size: usize,
    /// Length of the remote file in bytes.
    pub file_length: u64,
    /// URL of the remote file; may be relative to the control's own URL.
    pub url: String,
    /// Hex-encoded SHA-1 of the remote file, when the control carries one.
    pub sha1: Option<String>,
    /// Number of strong-digest bytes recorded per block.
    pub digest_len: usize,
    /// Per-block `(weak, strong)` checksums; block index is the position.
    pub checksums: Vec<(u32, Vec<u8>)>,
}

impl Control {
    /// Check the control for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidControl`] if the block size is zero, the
    /// digest length is outside [`MIN_DIGEST_LEN`]..=[`MAX_DIGEST_LEN`], any
    /// checksum entry has the wrong digest width, or the checksum count does
    /// not cover the file length.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(SyncError::InvalidControl("block size is zero".to_string()));
        }
        if !(MIN_DIGEST_LEN..=MAX_DIGEST_LEN).contains(&self.digest_len) {
            return Err(SyncError::InvalidControl(format!(
                "digest length {} outside {MIN_DIGEST_LEN}..={MAX_DIGEST_LEN}",
                self.digest_len
            )));
        }
        let expected_blocks = self.file_length.div_ceil(self.block_size as u64);
        if self.checksums.len() as u64 != expected_blocks {
            return Err(SyncError::InvalidControl(format!(
                "{} checksums for {expected_blocks} blocks",
                self.checksums.len()
            )));
        }
        for (index, (_, strong)) in self.checksums.iter().enumerate() {
            if strong.len() != self.digest_len {
                return Err(SyncError::InvalidControl(format!(
                    "block {index} digest is {} bytes, control declares {}",
                    strong.len(),
                    self.digest_len
                )));
            }
        }
        Ok(())
    }

    /// Number of blocks described by the control.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.checksums.len()
    }

    /// Build the two-tier lookup index from the checksum table.
    #[must_use]
    pub fn index(&self) -> ChecksumIndex {
        ChecksumIndex::new(
            self.digest_len,
            self.checksums.iter().enumerate().map(|(i, (weak, strong))| {
                #[allow(clippy::cast_possible_truncation)]
                let block_index = i as u32;
                BlockChecksum::new(block_index, *weak, strong.clone())
            }),
        )
    }

    /// Resolve a relative file URL against the control file's own URL.
    ///
    /// A URL already carrying an `http` or `ftp` scheme prefix is left
    /// untouched; anything else replaces the last path segment of
    /// `control_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidControl`] when either URL cannot be
    /// parsed.
    pub fn resolve_url(&mut self, control_url: &str) -> Result<()> {
        if self.url.starts_with("http") || self.url.starts_with("ftp") {
            return Ok(());
        }
        let base = Url::parse(control_url)
            .map_err(|err| SyncError::InvalidControl(format!("control URL: {err}")))?;
        let resolved = base
            .join(&self.url)
            .map_err(|err| SyncError::InvalidControl(format!("file URL: {err}")))?;
        self.url = resolved.to_string();
        Ok(())
    }
}
