//! On-disk chunk file layout (C1).
//!
//! ```text
//! offset 0    8 bytes signature: b"LIZC 1.0"
//! offset 8    u64 chunk_id
//! offset 16   u32 version
//! offset 20   u8  part_type tag (Standard/Xor/Ec, see `part_type::to_disk_tag`)
//! offset 21   u8  xor level / ec k
//! offset 22   u8  xor part index (0 = parity) / ec m
//! offset 23   u8  ec index (unused for Standard/Xor)
//! offset 24..1024  zero-padded reserved
//! offset 1024 block-CRC table: one big-endian u32 per block this part stores
//! offset 1024 + 4*block_count   first block begins here, each exactly 65536 bytes
//! ```
//!
//! Legacy `b"MFSC 1.0"` headers are recognized only well enough to reject
//! them with a clear error — reading the legacy format is out of scope for
//! this core (`DESIGN.md`, Open Question 1).

use std::convert::TryInto;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::chunk::crc::{crc32, Crc32Builder};
use crate::chunk::part_type::PartType;
use crate::error::ChunkserverError;

pub const BLOCK_SIZE: u32 = 65536;
pub const LOGICAL_BLOCKS: u32 = 1024;
pub const CHUNK_SIZE: u64 = BLOCK_SIZE as u64 * LOGICAL_BLOCKS as u64;
pub const HEADER_SIZE: u64 = 1024;

pub const SIGNATURE: &[u8; 8] = b"LIZC 1.0";
pub const LEGACY_SIGNATURE: &[u8; 8] = b"MFSC 1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSignature {
    pub chunk_id: u64,
    pub version: u32,
    pub part_type: PartType,
}

fn crc_table_offset() -> u64 {
    HEADER_SIZE
}

fn crc_table_bytes(part_type: &PartType) -> u64 {
    part_type.block_count(LOGICAL_BLOCKS) as u64 * 4
}

fn data_offset(part_type: &PartType) -> u64 {
    crc_table_offset() + crc_table_bytes(part_type)
}

fn block_offset(part_type: &PartType, block_index: u32) -> u64 {
    data_offset(part_type) + block_index as u64 * BLOCK_SIZE as u64
}

fn crc_slot_offset(part_type: &PartType, block_index: u32) -> u64 {
    crc_table_offset() + block_index as u64 * 4
}

/// An open chunk file plus the identity it was opened for.
pub struct ChunkFile {
    file: File,
    pub chunk_id: u64,
    pub version: u32,
    pub part_type: PartType,
}

impl ChunkFile {
    /// Writes a fresh header (and zeroed CRC table) for a brand-new chunk,
    /// used by `ChunkFileCreator::create`.
    pub fn create_new(
        path: impl AsRef<Path>,
        chunk_id: u64,
        version: u32,
        part_type: PartType,
    ) -> Result<Self, ChunkserverError> {
        part_type
            .validate()
            .map_err(|_| ChunkserverError::WrongRange { offset: 0, size: 0 })?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        write_header(&mut file, chunk_id, version, &part_type)?;
        let table = vec![0u8; crc_table_bytes(&part_type) as usize];
        file.seek(SeekFrom::Start(crc_table_offset()))?;
        file.write_all(&table)?;
        file.flush()?;
        Ok(ChunkFile { file, chunk_id, version, part_type })
    }

    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, ChunkserverError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let signature = read_header(&mut file)?;
        Ok(ChunkFile {
            file,
            chunk_id: signature.chunk_id,
            version: signature.version,
            part_type: signature.part_type,
        })
    }

    pub fn block_count(&self) -> u32 {
        self.part_type.block_count(LOGICAL_BLOCKS)
    }

    fn check_block_index(&self, block_index: u32) -> Result<(), ChunkserverError> {
        if block_index >= self.block_count() {
            return Err(ChunkserverError::WrongRange {
                offset: block_index * BLOCK_SIZE,
                size: BLOCK_SIZE,
            });
        }
        Ok(())
    }

    pub fn read_crc(&mut self, block_index: u32) -> Result<u32, ChunkserverError> {
        self.check_block_index(block_index)?;
        let mut buf = [0u8; 4];
        self.file.seek(SeekFrom::Start(crc_slot_offset(&self.part_type, block_index)))?;
        self.file.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn write_crc(&mut self, block_index: u32, crc: u32) -> Result<(), ChunkserverError> {
        self.check_block_index(block_index)?;
        self.file.seek(SeekFrom::Start(crc_slot_offset(&self.part_type, block_index)))?;
        self.file.write_all(&crc.to_be_bytes())?;
        Ok(())
    }

    /// Reads exactly one 64 KiB block and checks it against the stored CRC.
    pub fn verify_block(&mut self, block_index: u32) -> Result<Vec<u8>, ChunkserverError> {
        self.check_block_index(block_index)?;
        let expected = self.read_crc(block_index)?;
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        self.file.seek(SeekFrom::Start(block_offset(&self.part_type, block_index)))?;
        match self.file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ChunkserverError::Io(e));
            }
            Err(e) => return Err(ChunkserverError::Io(e)),
        }
        let actual = crc32(&buf);
        if actual != expected {
            return Err(ChunkserverError::CrcMismatch { chunk_id: self.chunk_id, block: block_index });
        }
        Ok(buf)
    }

    /// Reads a block without checking its CRC (used for degraded reads that
    /// will verify/reconstruct at a higher level).
    pub fn read_block_raw(&mut self, block_index: u32) -> Result<Vec<u8>, ChunkserverError> {
        self.check_block_index(block_index)?;
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        self.file.seek(SeekFrom::Start(block_offset(&self.part_type, block_index)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overwrites `size` bytes at `offset_in_block` within `block_index`.
    /// If the write doesn't cover the whole block, the surrounding bytes
    /// are preserved and the CRC is recomputed over the merged block.
    pub fn write_block(
        &mut self,
        block_index: u32,
        offset_in_block: u32,
        data: &[u8],
    ) -> Result<u32, ChunkserverError> {
        self.check_block_index(block_index)?;
        let size = data.len() as u32;
        if offset_in_block + size > BLOCK_SIZE {
            return Err(ChunkserverError::WrongRange { offset: offset_in_block, size });
        }

        let mut block = if offset_in_block == 0 && size == BLOCK_SIZE {
            vec![0u8; BLOCK_SIZE as usize]
        } else {
            self.read_block_raw(block_index).unwrap_or_else(|_| vec![0u8; BLOCK_SIZE as usize])
        };
        block[offset_in_block as usize..offset_in_block as usize + size as usize]
            .copy_from_slice(data);

        let crc = crc32(&block);
        self.file.seek(SeekFrom::Start(block_offset(&self.part_type, block_index)))?;
        self.file.write_all(&block)?;
        self.write_crc(block_index, crc)?;
        Ok(crc)
    }

    pub fn sync(&mut self) -> Result<(), ChunkserverError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

fn write_header(
    file: &mut File,
    chunk_id: u64,
    version: u32,
    part_type: &PartType,
) -> Result<(), ChunkserverError> {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..8].copy_from_slice(SIGNATURE);
    header[8..16].copy_from_slice(&chunk_id.to_be_bytes());
    header[16..20].copy_from_slice(&version.to_be_bytes());
    header[20] = part_type.to_disk_tag();
    let (a, b, c) = match *part_type {
        PartType::Standard => (0, 0, 0),
        PartType::Xor { level, part } => {
            let part_byte = match part {
                crate::chunk::part_type::XorPart::Parity => 0,
                crate::chunk::part_type::XorPart::Data(p) => p,
            };
            (level, part_byte, 0)
        }
        PartType::Ec { k, m, index } => (k, m, index),
    };
    header[21] = a;
    header[22] = b;
    header[23] = c;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    Ok(())
}

pub fn read_header(file: &mut File) -> Result<ChunkSignature, ChunkserverError> {
    let mut header = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)?;

    if &header[0..8] == LEGACY_SIGNATURE.as_slice() {
        return Err(ChunkserverError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "legacy MFSC 1.0 chunk headers are not supported by this core",
        )));
    }
    if &header[0..8] != SIGNATURE.as_slice() {
        return Err(ChunkserverError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "chunk signature mismatch",
        )));
    }

    let chunk_id = u64::from_be_bytes(header[8..16].try_into().unwrap());
    let version = u32::from_be_bytes(header[16..20].try_into().unwrap());
    let tag = header[20];
    let a = header[21];
    let b = header[22];
    let c = header[23];
    let part_type = PartType::from_disk_tag(tag, a, b, c)
        .map_err(|e| ChunkserverError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;

    Ok(ChunkSignature { chunk_id, version, part_type })
}

/// Recomputes the CRC of a full block from scratch; used by callers that
/// already hold the block bytes (e.g. the erasure planner after a merge).
pub fn crc_of_block(block: &[u8]) -> u32 {
    let mut builder = Crc32Builder::new();
    builder.update(block);
    builder.finalize()
}
