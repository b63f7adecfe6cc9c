//! Chunk planning: dedup matches, derive gaps, coalesce fetches.
//!
//! The planner turns an unordered stream of match records into an ordered,
//! disjoint list of chunks that covers the remote file exactly: `Reuse`
//! chunks copy from the local file, `Fetch` chunks become HTTP range
//! requests.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::scanner::MatchRecord;

/// How a planned chunk is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkKind {
    /// Copy from the local file.
    Reuse,
    /// Download from the remote URL.
    Fetch,
}

/// One span of the output file and where its bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChunk {
    /// Whether the span is reused or fetched.
    pub kind: ChunkKind,
    /// Byte offset in the local file for `Reuse`; equals `target_offset`
    /// for `Fetch` (the remote file is its own source).
    pub source_offset: u64,
    /// Byte offset in the output (and remote) file.
    pub target_offset: u64,
    /// Span length in bytes.
    pub size: u64,
}

impl PlannedChunk {
    fn reuse(record: MatchRecord) -> Self {
        Self {
            kind: ChunkKind::Reuse,
            source_offset: record.source_offset,
            target_offset: record.target_offset,
            size: record.size,
        }
    }

    fn fetch(begin: u64, end: u64) -> Self {
        Self {
            kind: ChunkKind::Fetch,
            source_offset: begin,
            target_offset: begin,
            size: end - begin,
        }
    }

    /// One past the last target byte of this chunk.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.target_offset + self.size
    }
}

/// Accumulates match records and produces the fetch/reuse partition.
#[derive(Debug)]
pub struct ChunkPlanner {
    remote_size: u64,
    min_gap: u64,
    matches: FxHashMap<u64, MatchRecord>,
}

impl ChunkPlanner {
    /// Create a planner for a remote file of `remote_size` bytes.
    ///
    /// Two fetches separated by fewer than `min_gap` bytes are merged into
    /// one request; the separation is refetched rather than reused.
    ///
    /// # Arguments
    ///
    /// * `remote_size` - Length of the remote file in bytes
    /// * `min_gap` - Minimum separation, in bytes, that keeps two fetches
    ///   as distinct requests
    #[must_use]
    pub fn new(remote_size: u64, min_gap: u64) -> Self {
        Self {
            remote_size,
            min_gap,
            matches: FxHashMap::default(),
        }
    }

    /// Record a match. A later record for the same target offset replaces
    /// an earlier one; any match is byte-equivalent at the target.
    ///
    /// # Arguments
    ///
    /// * `record` - A match produced by the scanner
    ///
    /// # Example
    ///
    /// ```rust
    /// use blocksync::{ChunkPlanner, MatchRecord};
    ///
    /// let mut planner = ChunkPlanner::new(64, 0);
    /// planner.add(MatchRecord {
    ///     source_offset: 40,
    ///     target_offset: 16,
    ///     size: 16,
    /// });
    /// assert_eq!(planner.match_count(), 1);
    /// ```
    pub fn add(&mut self, record: MatchRecord) {
        self.matches.insert(record.target_offset, record);
    }

    /// Record every match from `records`.
    pub fn extend<I: IntoIterator<Item = MatchRecord>>(&mut self, records: I) {
        for record in records {
            self.add(record);
        }
    }

    /// Number of distinct target offsets matched so far.
    #[must_use]
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Finalize the plan: a sorted, disjoint cover of the remote file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PlanInvariant`] if the produced chunks do not
    /// partition `[0, remote_size)`; that would be a planner bug.
    ///
    /// # Example
    ///
    /// ```rust
    /// use blocksync::{ChunkKind, ChunkPlanner, MatchRecord};
    ///
    /// let mut planner = ChunkPlanner::new(64, 0);
    /// planner.add(MatchRecord {
    ///     source_offset: 40,
    ///     target_offset: 16,
    ///     size: 16,
    /// });
    /// let plan = planner.plan().unwrap();
    /// // fetch [0,16), reuse [16,32), fetch [32,64)
    /// assert_eq!(plan.len(), 3);
    /// assert_eq!(plan[1].kind, ChunkKind::Reuse);
    /// ```
    pub fn plan(&self) -> Result<Vec<PlannedChunk>> {
        let mut matched: Vec<MatchRecord> = self.matches.values().copied().collect();
        matched.sort_unstable_by_key(|record| record.target_offset);

        let mut chunks = Vec::with_capacity(matched.len() * 2 + 1);
        let mut cursor = 0u64;
        for record in matched {
            if cursor < record.target_offset {
                chunks.push(PlannedChunk::fetch(cursor, record.target_offset));
            }
            chunks.push(PlannedChunk::reuse(record));
            cursor = record.target_offset + record.size;
        }
        if cursor < self.remote_size {
            chunks.push(PlannedChunk::fetch(cursor, self.remote_size));
        }

        let chunks = self.coalesce(chunks);
        debug!(
            chunks = chunks.len(),
            matched = self.matches.len(),
            "plan finalized"
        );
        Self::check_partition(&chunks, self.remote_size)?;
        Ok(chunks)
    }

    /// Merge fetches separated by fewer than `min_gap` bytes. The reuse
    /// chunks between two merged fetches are absorbed: those bytes ride
    /// along in the single larger request instead of being copied locally,
    /// so the result is still a partition.
    fn coalesce(&self, chunks: Vec<PlannedChunk>) -> Vec<PlannedChunk> {
        let mut out: Vec<PlannedChunk> = Vec::with_capacity(chunks.len());
        let mut last_fetch: Option<usize> = None;
        for chunk in chunks {
            match chunk.kind {
                ChunkKind::Fetch => {
                    if let Some(at) = last_fetch {
                        if chunk.target_offset - out[at].end() < self.min_gap {
                            out.truncate(at + 1);
                            out[at].size = chunk.end() - out[at].target_offset;
                            continue;
                        }
                    }
                    last_fetch = Some(out.len());
                    out.push(chunk);
                }
                ChunkKind::Reuse => out.push(chunk),
            }
        }
        out
    }

    fn check_partition(chunks: &[PlannedChunk], remote_size: u64) -> Result<()> {
        let mut cursor = 0u64;
        for chunk in chunks {
            if chunk.size == 0 {
                return Err(SyncError::PlanInvariant(format!(
                    "zero-size chunk at offset {}",
                    chunk.target_offset
                )));
            }
            if chunk.target_offset != cursor {
                return Err(SyncError::PlanInvariant(format!(
                    "expected chunk at offset {cursor}, found {}",
                    chunk.target_offset
                )));
            }
            cursor = chunk.end();
        }
        if cursor != remote_size {
            return Err(SyncError::PlanInvariant(format!(
                "plan covers {cursor} of {remote_size} bytes"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: u64, target: u64, size: u64) -> MatchRecord {
        MatchRecord {
            source_offset: source,
            target_offset: target,
            size,
        }
    }

    fn kinds(plan: &[PlannedChunk]) -> Vec<ChunkKind> {
        plan.iter().map(|chunk| chunk.kind).collect()
    }

    #[test]
    fn full_reuse_has_no_fetches() {
        // Four matched blocks covering the whole file.
        let mut planner = ChunkPlanner::new(64, 1024);
        for i in 0..4 {
            planner.add(record(i * 16, i * 16, 16));
        }
        let plan = planner.plan().unwrap();
        assert_eq!(plan.len(), 4);
        assert!(plan.iter().all(|chunk| chunk.kind == ChunkKind::Reuse));
        let targets: Vec<u64> = plan.iter().map(|chunk| chunk.target_offset).collect();
        assert_eq!(targets, vec![0, 16, 32, 48]);
    }

    #[test]
    fn no_matches_is_one_fetch() {
        let planner = ChunkPlanner::new(64, 1024);
        let plan = planner.plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].kind, ChunkKind::Fetch);
        assert_eq!(plan[0].target_offset, 0);
        assert_eq!(plan[0].size, 64);
    }

    #[test]
    fn shifted_content_fetches_the_head() {
        // Remote = 4 unknown bytes + one matched 16-byte block.
        let mut planner = ChunkPlanner::new(20, 0);
        planner.add(record(0, 4, 16));
        let plan = planner.plan().unwrap();
        assert_eq!(kinds(&plan), vec![ChunkKind::Fetch, ChunkKind::Reuse]);
        assert_eq!(plan[0].size, 4);
        assert_eq!(plan[1].source_offset, 0);
        assert_eq!(plan[1].target_offset, 4);
    }

    #[test]
    fn duplicated_block_reused_at_both_targets() {
        let mut planner = ChunkPlanner::new(64, 0);
        planner.add(record(100, 16, 16));
        planner.add(record(100, 48, 16));
        planner.add(record(0, 0, 16));
        planner.add(record(32, 32, 16));
        let plan = planner.plan().unwrap();
        let reused_from_100: Vec<u64> = plan
            .iter()
            .filter(|chunk| chunk.kind == ChunkKind::Reuse && chunk.source_offset == 100)
            .map(|chunk| chunk.target_offset)
            .collect();
        assert_eq!(reused_from_100, vec![16, 48]);
    }

    #[test]
    fn later_match_replaces_earlier_at_same_target() {
        let mut planner = ChunkPlanner::new(16, 0);
        planner.add(record(0, 0, 16));
        planner.add(record(300, 0, 16));
        let plan = planner.plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].source_offset, 300);
    }

    #[test]
    fn nearby_fetches_coalesce_across_reuse() {
        // Fetch [0,10), reuse [10,200), fetch [200,300); the 190-byte
        // separation is below min_gap so one request covers [0,300).
        let mut planner = ChunkPlanner::new(300, 1024);
        planner.add(record(0, 10, 190));
        let plan = planner.plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].kind, ChunkKind::Fetch);
        assert_eq!(plan[0].target_offset, 0);
        assert_eq!(plan[0].size, 300);
    }

    #[test]
    fn distant_fetches_stay_separate() {
        let mut planner = ChunkPlanner::new(3000, 100);
        planner.add(record(0, 10, 1990));
        let plan = planner.plan().unwrap();
        assert_eq!(
            kinds(&plan),
            vec![ChunkKind::Fetch, ChunkKind::Reuse, ChunkKind::Fetch]
        );
        assert_eq!(plan[2].target_offset, 2000);
        assert_eq!(plan[2].size, 1000);
    }

    #[test]
    fn chain_of_fetches_merges_repeatedly() {
        // Reuse islands too small to keep: everything collapses into one
        // fetch.
        let mut planner = ChunkPlanner::new(100, 50);
        planner.add(record(0, 10, 10));
        planner.add(record(0, 40, 10));
        planner.add(record(0, 70, 10));
        let plan = planner.plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].size, 100);
    }

    #[test]
    fn short_tail_match_is_kept() {
        // Remote of 70 bytes, last block clipped to 6.
        let mut planner = ChunkPlanner::new(70, 0);
        for i in 0..4 {
            planner.add(record(i * 16, i * 16, 16));
        }
        planner.add(record(64, 64, 6));
        let plan = planner.plan().unwrap();
        assert_eq!(plan.len(), 5);
        assert_eq!(plan[4].size, 6);
        assert!(plan.iter().all(|chunk| chunk.kind == ChunkKind::Reuse));
    }

    #[test]
    fn empty_remote_plans_nothing() {
        let planner = ChunkPlanner::new(0, 1024);
        assert!(planner.plan().unwrap().is_empty());
    }

    #[test]
    fn planned_chunk_serde_roundtrip() {
        let chunk = PlannedChunk {
            kind: ChunkKind::Fetch,
            source_offset: 10,
            target_offset: 10,
            size: 90,
        };
        let bytes = bincode::serialize(&chunk).unwrap();
        let restored: PlannedChunk = bincode::deserialize(&bytes).unwrap();
        assert_eq!(chunk, restored);
    }
}
