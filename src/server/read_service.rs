//! C7 — read service & plan executor: turns a `READ` request into
//! assembled, CRC-checked bytes, following the fixed order from
//! `SPEC_FULL.md` §4.7 — gather every part's bytes first, then run
//! `xor_ops`/`ec_recover`, then hand the caller the assembled buffer.
//!
//! Grounded on `examples/original_source/src/mount/read_operation_planner.h`
//! for that gather-then-combine ordering.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::chunk::{PartType, BLOCK_SIZE};
use crate::erasure::{reconstruct_block, ReadPlan, ReedSolomon};
use crate::error::ChunkserverError;
use crate::hdd::DiskManager;

/// Supplies bytes for a part this server doesn't hold locally. A trait so
/// tests can substitute an in-memory peer instead of a real
/// `LIZ_CLTOCS_READ` connection.
pub trait RemotePartSource: Send + Sync {
    fn read_remote(
        &self,
        addr: SocketAddr,
        chunk_id: u64,
        part_type: PartType,
        offset: u32,
        size: u32,
    ) -> Result<Vec<u8>, ChunkserverError>;
}

/// Where a chosen part's bytes should come from.
#[derive(Debug, Clone, Copy)]
pub enum PartLocation {
    Local,
    Remote(SocketAddr),
}

/// Executes a `ReadPlan` against local storage and/or remote peers.
pub struct ReadExecutor<'a, R: RemotePartSource> {
    pub disk_manager: &'a DiskManager,
    pub remote: &'a R,
}

impl<'a, R: RemotePartSource> ReadExecutor<'a, R> {
    /// Assembles the plan's output buffer. `locations` tells the executor,
    /// per part type the plan reads, whether to fetch it locally or from a
    /// peer; a part type absent from `locations` defaults to `Local`.
    pub fn execute(
        &self,
        chunk_id: u64,
        version: u32,
        locations: &HashMap<PartType, PartLocation>,
        plan: &ReadPlan,
    ) -> Result<Vec<u8>, ChunkserverError> {
        let mut buffer = vec![0u8; plan.required_buffer_size as usize];

        for (key, op) in &plan.read_ops {
            let part_type = PartType::from_wire_id(key.0)
                .map_err(|_| ChunkserverError::WrongRange { offset: op.request_offset, size: op.request_size })?;

            let bytes = match locations.get(&part_type) {
                Some(PartLocation::Remote(addr)) => {
                    self.remote.read_remote(*addr, chunk_id, part_type, op.request_offset, op.request_size)?
                }
                _ => {
                    self.disk_manager.open(chunk_id, version, part_type)?;
                    let result = self.disk_manager.read(chunk_id, part_type, op.request_offset, op.request_size);
                    self.disk_manager.close(chunk_id, part_type);
                    result?
                }
            };

            for (i, &dst) in op.dst_offsets.iter().enumerate() {
                let src_start = i * BLOCK_SIZE as usize;
                let src_end = (src_start + BLOCK_SIZE as usize).min(bytes.len());
                let dst = dst as usize;
                buffer[dst..dst + (src_end - src_start)].copy_from_slice(&bytes[src_start..src_end]);
            }
        }

        for xor_op in &plan.xor_ops {
            let sources: Vec<&[u8]> = xor_op
                .sources
                .iter()
                .map(|&s| &buffer[s as usize..s as usize + BLOCK_SIZE as usize])
                .collect();
            let reconstructed = reconstruct_block(&sources);
            let dst = xor_op.dst_offset as usize;
            buffer[dst..dst + BLOCK_SIZE as usize].copy_from_slice(&reconstructed);
        }

        if let Some(ec) = &plan.ec_recover {
            let rs = ReedSolomon::new(ec.k, ec.m)?;
            let available: Vec<(usize, Vec<u8>)> = ec
                .fragments
                .iter()
                .map(|&(row, dst)| (row, buffer[dst as usize..dst as usize + BLOCK_SIZE as usize].to_vec()))
                .collect();
            let recovered = rs.recover(&available)?;
            for (i, fragment) in recovered.into_iter().enumerate() {
                let dst = i * BLOCK_SIZE as usize;
                if dst + BLOCK_SIZE as usize <= buffer.len() {
                    buffer[dst..dst + BLOCK_SIZE as usize].copy_from_slice(&fragment);
                }
            }
        }

        buffer.truncate(plan.output_size as usize);
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::XorPart;
    use crate::erasure::{build_plan, choose_parts};
    use crate::hdd::ChunkFileCreator;

    struct NoRemote;
    impl RemotePartSource for NoRemote {
        fn read_remote(&self, _: SocketAddr, _: u64, _: PartType, _: u32, _: u32) -> Result<Vec<u8>, ChunkserverError> {
            Err(ChunkserverError::NoSpace)
        }
    }

    fn write_standard_chunk(dir: &std::path::Path, chunk_id: u64, version: u32, blocks: &[&[u8]]) {
        let mut creator = ChunkFileCreator::new(dir.to_path_buf(), chunk_id, version, PartType::Standard);
        creator.create().unwrap();
        for (i, block) in blocks.iter().enumerate() {
            creator.write(i as u32, 0, block).unwrap();
        }
        creator.commit().unwrap();
    }

    #[test]
    fn full_read_from_standard_returns_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DiskManager::new(vec![dir.path().to_path_buf()]);
        let a = vec![b'A'; BLOCK_SIZE as usize];
        let b = vec![b'B'; BLOCK_SIZE as usize];
        let c = vec![b'C'; BLOCK_SIZE as usize];
        write_standard_chunk(dir.path(), 1, 1, &[&a, &b, &c]);
        manager.scan_all();

        let plan = build_plan(&choose_parts(&[PartType::Standard]).unwrap(), 0, 3);
        let executor = ReadExecutor { disk_manager: &manager, remote: &NoRemote };
        let out = executor.execute(1, 1, &HashMap::new(), &plan).unwrap();

        let mut expected = a;
        expected.extend(b);
        expected.extend(c);
        assert_eq!(out, expected);
    }

    #[test]
    fn degraded_read_reconstructs_missing_xor_part_via_parity() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DiskManager::new(vec![dir.path().to_path_buf()]);

        let data1 = vec![b'X'; BLOCK_SIZE as usize];
        let data2 = vec![b'Y'; BLOCK_SIZE as usize];
        let mut parity = data1.clone();
        crate::erasure::block_xor(&mut parity, &data2);

        let pt2 = PartType::Xor { level: 2, part: XorPart::Data(2) };
        let pt_parity = PartType::Xor { level: 2, part: XorPart::Parity };
        let mut c2 = ChunkFileCreator::new(dir.path().to_path_buf(), 7, 3, pt2);
        c2.create().unwrap();
        c2.write(0, 0, &data2).unwrap();
        c2.commit().unwrap();
        let mut cp = ChunkFileCreator::new(dir.path().to_path_buf(), 7, 3, pt_parity);
        cp.create().unwrap();
        cp.write(0, 0, &parity).unwrap();
        cp.commit().unwrap();
        manager.scan_all();

        // data1 (xor_1_of_2) is deliberately absent: reading its logical
        // block (block 0, owned by data1) must reconstruct from data2 +
        // parity rather than come from an actual data1 file.
        let available = vec![pt2, pt_parity];
        let chosen = choose_parts(&available).unwrap();
        let plan = build_plan(&chosen, 0, 1);
        let executor = ReadExecutor { disk_manager: &manager, remote: &NoRemote };
        let out = executor.execute(7, 3, &HashMap::new(), &plan).unwrap();
        assert_eq!(out, data1);
    }
}
