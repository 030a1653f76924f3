//! Crate-wide error types.
//!
//! Internal plumbing uses `anyhow::Error` freely (job closures, config
//! loading, disk scanning). At the boundary where a result is about to be
//! put on the wire or reported to a caller across a job/thread boundary it
//! is mapped into a [`StatusCode`], which is `Copy` and has a stable wire
//! representation.

use thiserror::Error;

/// Status codes exchanged with clients and other chunkservers.
///
/// Mirrors the small set of outcomes the write-chain and read protocols
/// need to distinguish; this is deliberately not as rich as `anyhow::Error`
/// because it has to survive serialization onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    WrongOffset = 1,
    Eof = 2,
    Crc = 3,
    ChunkNotFound = 4,
    WrongVersion = 5,
    NotDone = 6,
    Io = 7,
    WrongBlockSize = 8,
    NoSpace = 9,
    ChunkExists = 10,
    ChunkLocked = 11,
    Disconnected = 12,
    ConnectionTimeout = 13,
    Malformed = 14,
    Einval = 15,
    Eperm = 16,
    Waiting = 17,
}

impl StatusCode {
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => StatusCode::Ok,
            1 => StatusCode::WrongOffset,
            2 => StatusCode::Eof,
            3 => StatusCode::Crc,
            4 => StatusCode::ChunkNotFound,
            5 => StatusCode::WrongVersion,
            6 => StatusCode::NotDone,
            7 => StatusCode::Io,
            8 => StatusCode::WrongBlockSize,
            9 => StatusCode::NoSpace,
            10 => StatusCode::ChunkExists,
            11 => StatusCode::ChunkLocked,
            12 => StatusCode::Disconnected,
            13 => StatusCode::ConnectionTimeout,
            14 => StatusCode::Malformed,
            15 => StatusCode::Einval,
            16 => StatusCode::Eperm,
            _ => StatusCode::Waiting,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

/// Typed errors produced by the chunk store and erasure modules.
///
/// Kept separate from [`StatusCode`] because these carry context useful in
/// logs (`anyhow`/`log`) that doesn't need to survive serialization.
#[derive(Debug, Error)]
pub enum ChunkserverError {
    #[error("chunk {chunk_id:016x} not found")]
    ChunkNotFound { chunk_id: u64 },

    #[error("chunk {chunk_id:016x} version mismatch: expected {expected}, found {found}")]
    WrongVersion {
        chunk_id: u64,
        expected: u32,
        found: u32,
    },

    #[error("crc mismatch in chunk {chunk_id:016x} block {block}")]
    CrcMismatch { chunk_id: u64, block: u32 },

    #[error("block offset/size out of range: offset={offset} size={size}")]
    WrongRange { offset: u32, size: u32 },

    #[error("no disk with enough free space for a new chunk")]
    NoSpace,

    #[error("chunk {chunk_id:016x} already exists")]
    ChunkExists { chunk_id: u64 },

    #[error("insufficient parts to reconstruct chunk {chunk_id:016x}: have {have}, need {need}")]
    InsufficientParts { chunk_id: u64, have: usize, need: usize },

    #[error("timed out connecting downstream")]
    ConnectionTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChunkserverError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChunkserverError::ChunkNotFound { .. } => StatusCode::ChunkNotFound,
            ChunkserverError::WrongVersion { .. } => StatusCode::WrongVersion,
            ChunkserverError::CrcMismatch { .. } => StatusCode::Crc,
            ChunkserverError::WrongRange { .. } => StatusCode::WrongOffset,
            ChunkserverError::NoSpace => StatusCode::NoSpace,
            ChunkserverError::ChunkExists { .. } => StatusCode::ChunkExists,
            ChunkserverError::InsufficientParts { .. } => StatusCode::Io,
            ChunkserverError::ConnectionTimeout => StatusCode::ConnectionTimeout,
            ChunkserverError::Io(_) => StatusCode::Io,
        }
    }
}
