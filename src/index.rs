//! Two-tier checksum lookup for remote blocks.
//!
//! The scanner probes the weak tier once per byte of advance, so it must be
//! O(1) average; the strong tier disambiguates weak collisions and is only
//! consulted after a weak hit.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Checksums of a single block of the remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockChecksum {
    /// 0-based block ordinal in the remote file.
    pub block_index: u32,
    /// 32-bit rolling checksum of the (zero-padded) block.
    pub weak: u32,
    /// Truncated MD4 digest of the (zero-padded) block.
    pub strong: Vec<u8>,
}

impl BlockChecksum {
    /// Create a new block checksum entry.
    ///
    /// # Arguments
    ///
    /// * `block_index` - Position of the block in the remote file
    /// * `weak` - Rolling checksum of the block
    /// * `strong` - Truncated MD4 digest of the block
    #[must_use]
    pub const fn new(block_index: u32, weak: u32, strong: Vec<u8>) -> Self {
        Self {
            block_index,
            weak,
            strong,
        }
    }
}

/// Immutable lookup table from weak checksum to candidate blocks.
///
/// Many blocks may share a weak checksum; a bucket holds all of them and the
/// strong digest picks out the real matches. Each `block_index` appears in
/// exactly one bucket. The table is built once from the control and shared
/// read-only across scan workers.
#[derive(Debug)]
pub struct ChecksumIndex {
    buckets: FxHashMap<u32, Vec<BlockChecksum>>,
    digest_len: usize,
    block_count: usize,
}

impl ChecksumIndex {
    /// Build the index from per-block checksums, in any order.
    ///
    /// # Arguments
    ///
    /// * `digest_len` - Strong-digest bytes to compare on lookup
    /// * `checksums` - One entry per block of the remote file
    ///
    /// # Example
    ///
    /// ```rust
    /// use blocksync::{BlockChecksum, ChecksumIndex};
    ///
    /// let index = ChecksumIndex::new(4, vec![
    ///     BlockChecksum::new(0, 0x1234, b"abcd".to_vec()),
    /// ]);
    /// assert_eq!(index.block_count(), 1);
    /// ```
    #[must_use]
    pub fn new<I>(digest_len: usize, checksums: I) -> Self
    where
        I: IntoIterator<Item = BlockChecksum>,
    {
        let mut buckets: FxHashMap<u32, Vec<BlockChecksum>> = FxHashMap::default();
        let mut block_count = 0;
        for checksum in checksums {
            buckets.entry(checksum.weak).or_default().push(checksum);
            block_count += 1;
        }
        Self {
            buckets,
            digest_len,
            block_count,
        }
    }

    /// All blocks whose weak checksum equals `weak`, or `None`.
    ///
    /// # Arguments
    ///
    /// * `weak` - Rolling checksum of the candidate window
    ///
    /// # Example
    ///
    /// ```rust
    /// use blocksync::{BlockChecksum, ChecksumIndex};
    ///
    /// let index = ChecksumIndex::new(4, vec![
    ///     BlockChecksum::new(0, 0x1234, b"abcd".to_vec()),
    /// ]);
    /// assert!(index.find_weak(0x1234).is_some());
    /// assert!(index.find_weak(0x9999).is_none());
    /// ```
    #[must_use]
    pub fn find_weak(&self, weak: u32) -> Option<&[BlockChecksum]> {
        self.buckets.get(&weak).map(Vec::as_slice)
    }

    /// The subset of `candidates` whose stored digest equals the truncated
    /// `digest`, or `None` when nothing matches.
    ///
    /// Identical content at multiple target offsets is legal; every match
    /// is returned because each is a distinct reuse opportunity.
    ///
    /// # Arguments
    ///
    /// * `candidates` - A bucket returned by [`ChecksumIndex::find_weak`]
    /// * `digest` - Strong digest of the candidate window; only the
    ///   index's declared prefix length participates in the comparison
    ///
    /// # Example
    ///
    /// ```rust
    /// use blocksync::{BlockChecksum, ChecksumIndex};
    ///
    /// let index = ChecksumIndex::new(4, vec![
    ///     BlockChecksum::new(0, 0x1234, b"abcd".to_vec()),
    ///     BlockChecksum::new(7, 0x1234, b"abcd".to_vec()),
    /// ]);
    /// let candidates = index.find_weak(0x1234).unwrap();
    /// let matched = index.find_strong(candidates, b"abcdefghijklmnop").unwrap();
    /// assert_eq!(matched.len(), 2);
    /// ```
    #[must_use]
    pub fn find_strong<'a>(
        &self,
        candidates: &'a [BlockChecksum],
        digest: &[u8],
    ) -> Option<Vec<&'a BlockChecksum>> {
        let prefix = &digest[..self.digest_len.min(digest.len())];
        let matches: Vec<&BlockChecksum> = candidates
            .iter()
            .filter(|candidate| candidate.strong == prefix)
            .collect();
        if matches.is_empty() {
            None
        } else {
            Some(matches)
        }
    }

    /// Number of bytes of the strong digest this index compares.
    #[must_use]
    pub const fn digest_len(&self) -> usize {
        self.digest_len
    }

    /// Total number of indexed blocks.
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.block_count
    }

    /// Whether the index holds no blocks.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    /// Number of distinct weak checksums.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
