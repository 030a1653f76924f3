//! Server-side data-plane components built on top of the storage and
//! protocol layers: the read service (C7), the replicator (C8), and the
//! wrong-CRC notifier (C9).

pub mod notifier;
pub mod read_service;
pub mod replicator;

pub use notifier::{ConnectorTestChunkSender, TestChunkSender, WrongCrcNotifier};
pub use read_service::{PartLocation, ReadExecutor, RemotePartSource};
pub use replicator::{ChunkReplicator, ChunkTypeWithAddress, ReplicationSource};
