//! C6 — wire framing and the write-chain relay.

pub mod messages;
pub mod write_chain;

pub use messages::{NetworkAddress, WriteData, WriteEnd, WriteInit, WriteStatus};
pub use write_chain::{ChunkConnector, TcpChunkConnector, WriteChainRelay};
