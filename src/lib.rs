//! Data-plane core of a LizardFS/MooseFS-style chunkserver: chunk file
//! format and CRC, the HDD space manager, the XOR/Reed-Solomon erasure
//! planner, the bounded job-pool worker system, chunkserver stats, the
//! write-chain relay protocol, the read service, the replicator, the
//! wrong-CRC notifier, and the abstract event-loop contract they're all
//! driven by.

pub mod chunk;
pub mod config;
pub mod erasure;
pub mod error;
pub mod eventloop;
pub mod hdd;
pub mod jobpool;
pub mod protocol;
pub mod server;
pub mod stats;

pub use config::Config;
pub use error::{ChunkserverError, StatusCode};
