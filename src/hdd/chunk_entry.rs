//! In-memory index entry for a stored chunk part.

use std::path::PathBuf;
use std::time::Instant;

use crate::chunk::PartType;

#[derive(Debug, Clone)]
pub struct ChunkEntry {
    pub chunk_id: u64,
    pub version: u32,
    pub part_type: PartType,
    pub disk_index: usize,
    pub path: PathBuf,
    pub last_access: Instant,
}

impl ChunkEntry {
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }
}
