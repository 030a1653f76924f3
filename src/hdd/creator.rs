//! `ChunkFileCreator` state machine (C2 sub-component).
//!
//! Grounded on
//! `examples/original_source/src/chunkserver/chunk_file_creator.h`/`.cc`:
//! `Fresh -> Created -> Open -> Committed`, with `Open -> Aborted` firing
//! from the destructor whenever `commit()` was never reached — the
//! original's C++ RAII teardown becomes Rust's `Drop`.

use std::path::PathBuf;

use crate::chunk::{chunk_filename, ChunkFile, PartType};
use crate::error::ChunkserverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Created,
    Open,
    Committed,
    Aborted,
}

pub struct ChunkFileCreator {
    state: State,
    root: PathBuf,
    chunk_id: u64,
    version: u32,
    part_type: PartType,
    file: Option<ChunkFile>,
}

impl ChunkFileCreator {
    pub fn new(root: PathBuf, chunk_id: u64, version: u32, part_type: PartType) -> Self {
        ChunkFileCreator { state: State::Fresh, root, chunk_id, version, part_type, file: None }
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(format!("{}.creating", chunk_filename(self.chunk_id, self.version, &self.part_type)))
    }

    fn final_path(&self) -> PathBuf {
        self.root.join(chunk_filename(self.chunk_id, self.version, &self.part_type))
    }

    /// `Fresh -> Created -> Open`: writes the header and empty CRC table to
    /// a temporary path so a crash mid-write never produces a file that
    /// `chunk_filename` would resolve a reader to.
    pub fn create(&mut self) -> Result<(), ChunkserverError> {
        assert_eq!(self.state, State::Fresh, "create() called out of order");
        let file = ChunkFile::create_new(self.temp_path(), self.chunk_id, self.version, self.part_type)?;
        self.state = State::Created;
        self.file = Some(file);
        self.state = State::Open;
        Ok(())
    }

    pub fn write(&mut self, block_index: u32, offset_in_block: u32, data: &[u8]) -> Result<u32, ChunkserverError> {
        assert_eq!(self.state, State::Open, "write() called outside Open state");
        self.file.as_mut().expect("Open state implies a file").write_block(block_index, offset_in_block, data)
    }

    /// Exposed for the replicator, which streams bytes in as it pulls them
    /// from peers rather than buffering a whole chunk in memory.
    pub fn path_during_create(&self) -> PathBuf {
        self.temp_path()
    }

    /// `Open -> Committed`: syncs and atomically renames into place.
    pub fn commit(mut self) -> Result<(), ChunkserverError> {
        assert_eq!(self.state, State::Open, "commit() called outside Open state");
        if let Some(mut file) = self.file.take() {
            file.sync()?;
        }
        std::fs::rename(self.temp_path(), self.final_path())?;
        self.state = State::Committed;
        Ok(())
    }
}

impl Drop for ChunkFileCreator {
    fn drop(&mut self) {
        if matches!(self.state, State::Open | State::Created) {
            self.state = State::Aborted;
            let _ = std::fs::remove_file(self.temp_path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_renames_into_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut creator = ChunkFileCreator::new(dir.path().to_path_buf(), 10, 1, PartType::Standard);
        creator.create().unwrap();
        creator.write(0, 0, &vec![7u8; 65536]).unwrap();
        creator.commit().unwrap();

        let final_path = dir.path().join(chunk_filename(10, 1, &PartType::Standard));
        assert!(final_path.exists());
    }

    #[test]
    fn drop_without_commit_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let temp_path;
        {
            let mut creator = ChunkFileCreator::new(dir.path().to_path_buf(), 11, 1, PartType::Standard);
            creator.create().unwrap();
            temp_path = creator.temp_path();
            assert!(temp_path.exists());
        }
        assert!(!temp_path.exists());
    }
}
