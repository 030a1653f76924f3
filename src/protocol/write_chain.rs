//! Write-chain relay (C6): a client's write fans out along a chain of
//! chunkservers; this module implements one hop's side of that relay.
//!
//! Grounded on `SPEC_FULL.md` §4.6 and
//! `examples/original_source/src/mount/chunk_connector.h` for the
//! downstream-connect contract (`kMaxConnectionRetries = 5`).

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::PartType;
use crate::error::{ChunkserverError, StatusCode};
use crate::hdd::{ChunkFileCreator, DiskManager};
use crate::protocol::messages::{NetworkAddress, WriteData, WriteEnd, WriteInit, WriteStatus};

const MAX_CONNECTION_RETRIES: u8 = 5;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Supplies sockets to the next hop in a chain. A trait so tests can swap
/// in an in-process pair of pipes instead of real TCP.
pub trait ChunkConnector: Send + Sync {
    type Stream: Read + Write + Send;
    fn connect(&self, addr: NetworkAddress) -> std::io::Result<Self::Stream>;
}

/// Default connector: plain TCP, retried up to `kMaxConnectionRetries`
/// times, each attempt bounded by the connection timeout.
pub struct TcpChunkConnector {
    #[allow(dead_code)]
    source_ip: Ipv4Addr,
}

impl TcpChunkConnector {
    pub fn new(source_ip: Ipv4Addr) -> Self {
        TcpChunkConnector { source_ip }
    }
}

impl ChunkConnector for TcpChunkConnector {
    type Stream = TcpStream;

    fn connect(&self, addr: NetworkAddress) -> std::io::Result<TcpStream> {
        let mut last_err = None;
        for _ in 0..MAX_CONNECTION_RETRIES {
            match TcpStream::connect_timeout(&addr.to_socket_addr(), CONNECTION_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect failed")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Forwarding,
    Draining,
    Done,
}

/// One hop's view of an in-flight write: the local chunk plus (optionally)
/// a connection forwarding the same frames downstream.
pub struct WriteChainRelay<C: ChunkConnector> {
    #[allow(dead_code)]
    connector: Arc<C>,
    disk_manager: Arc<DiskManager>,
    chunk_id: u64,
    new_version: u32,
    part_type: PartType,
    disk_index: usize,
    creator: Option<ChunkFileCreator>,
    downstream: Option<C::Stream>,
    state: RelayState,
}

impl<C: ChunkConnector> WriteChainRelay<C> {
    /// Handles `WRITE_INIT`: creates the chunk locally (held open but not
    /// yet committed, so readers and standard openers still see the prior
    /// version or nothing until `WRITE_END` lands), then — if the chain has
    /// more hops — connects downstream and forwards the frame with the
    /// head stripped.
    pub fn start(connector: Arc<C>, disk_manager: Arc<DiskManager>, init: &WriteInit, _prior_version: u32) -> Result<Self, ChunkserverError> {
        let (mut creator, disk_index) = disk_manager.create_chunk(init.chunk_id, init.version, init.part_type)?;
        creator.create()?;

        let downstream = if let Some(&next_hop) = init.chain.first() {
            match connector.connect(next_hop) {
                Ok(mut stream) => {
                    init.without_head().write_to(&mut stream).map_err(ChunkserverError::Io)?;
                    Some(stream)
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(ChunkserverError::ConnectionTimeout)
                }
                Err(e) => return Err(ChunkserverError::Io(e)),
            }
        } else {
            None
        };

        Ok(WriteChainRelay {
            connector,
            disk_manager,
            chunk_id: init.chunk_id,
            new_version: init.version,
            part_type: init.part_type,
            disk_index,
            creator: Some(creator),
            downstream,
            state: RelayState::Forwarding,
        })
    }

    /// Handles one `WRITE_DATA` frame: verifies its CRC, forwards it
    /// downstream (if any), and writes it into the not-yet-committed local
    /// chunk. Any failure enters the draining substate and rolls back.
    pub fn handle_write_data(&mut self, frame: &WriteData) -> StatusCode {
        if self.state != RelayState::Forwarding {
            return StatusCode::NotDone;
        }

        let computed_crc = crate::chunk::crc::crc32(&frame.payload);
        if computed_crc != frame.crc {
            self.enter_draining();
            return StatusCode::Crc;
        }

        if let Some(downstream) = self.downstream.as_mut() {
            if frame.write_to(downstream).is_err() {
                self.enter_draining();
                return StatusCode::Disconnected;
            }
        }

        let block_size = crate::chunk::BLOCK_SIZE;
        let result = self
            .creator
            .as_mut()
            .expect("creator present while Forwarding")
            .write(frame.offset / block_size, frame.offset % block_size, &frame.payload);
        match result {
            Ok(_) => StatusCode::Ok,
            Err(e) => {
                self.enter_draining();
                e.status_code()
            }
        }
    }

    /// Handles `WRITE_END`: forwards it downstream, commits the local
    /// chunk and registers it with the disk manager.
    pub fn handle_write_end(&mut self, end: &WriteEnd) -> StatusCode {
        if self.state == RelayState::Draining {
            self.rollback();
            return StatusCode::NotDone;
        }

        if let Some(downstream) = self.downstream.as_mut() {
            if end.write_to(downstream).is_err() {
                self.rollback();
                return StatusCode::Disconnected;
            }
        }

        let creator = self.creator.take().expect("creator present while Forwarding");
        if let Err(e) = creator.commit() {
            self.state = RelayState::Done;
            return e.status_code();
        }
        self.disk_manager.register_created(self.chunk_id, self.new_version, self.part_type, self.disk_index);
        self.state = RelayState::Done;
        StatusCode::Ok
    }

    fn enter_draining(&mut self) {
        self.state = RelayState::Draining;
    }

    /// Drops the held `ChunkFileCreator` without committing, which deletes
    /// its temp file — nothing was ever registered with the disk manager,
    /// so no prior version needs restoring.
    fn rollback(&mut self) {
        self.creator = None;
        self.downstream = None;
        self.state = RelayState::Done;
    }
}

/// Reads one status reply off a downstream connection, used by the relay
/// to propagate the first failing hop's status upstream unchanged.
pub fn read_downstream_status(stream: &mut impl Read) -> std::io::Result<WriteStatus> {
    WriteStatus::read_from(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// An in-process connector that always hands back the same in-memory
    /// duplex buffer, for exercising the relay without real sockets.
    struct LoopbackConnector {
        buffer: Mutex<Vec<u8>>,
    }

    impl ChunkConnector for LoopbackConnector {
        type Stream = Cursor<Vec<u8>>;

        fn connect(&self, _addr: NetworkAddress) -> std::io::Result<Cursor<Vec<u8>>> {
            Ok(Cursor::new(Vec::new()))
        }
    }

    #[test]
    fn tail_of_chain_has_no_downstream_connection() {
        let dir = tempfile::tempdir().unwrap();
        let disk_manager = Arc::new(DiskManager::new(vec![dir.path().to_path_buf()]));
        let connector = Arc::new(LoopbackConnector { buffer: Mutex::new(Vec::new()) });
        let init = WriteInit { chunk_id: 1, version: 1, part_type: PartType::Standard, chain: vec![] };
        let relay = WriteChainRelay::start(connector, disk_manager, &init, 0).unwrap();
        assert!(relay.downstream.is_none());
    }

    #[test]
    fn bad_crc_enters_draining_and_reports_crc_error() {
        let dir = tempfile::tempdir().unwrap();
        let disk_manager = Arc::new(DiskManager::new(vec![dir.path().to_path_buf()]));
        let connector = Arc::new(LoopbackConnector { buffer: Mutex::new(Vec::new()) });
        let init = WriteInit { chunk_id: 2, version: 1, part_type: PartType::Standard, chain: vec![] };
        let mut relay = WriteChainRelay::start(connector, disk_manager, &init, 0).unwrap();

        let frame = WriteData {
            version: 1,
            chunk_id: 2,
            write_id: 1,
            block: 0,
            offset: 0,
            size: 4,
            crc: 0xDEAD_BEEF,
            payload: vec![1, 2, 3, 4],
        };
        assert_eq!(relay.handle_write_data(&frame), StatusCode::Crc);
        assert_eq!(relay.state, RelayState::Draining);
    }

    #[test]
    fn successful_write_chain_commits_and_registers_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let disk_manager = Arc::new(DiskManager::new(vec![dir.path().to_path_buf()]));
        let connector = Arc::new(LoopbackConnector { buffer: Mutex::new(Vec::new()) });
        let init = WriteInit { chunk_id: 3, version: 1, part_type: PartType::Standard, chain: vec![] };
        let mut relay = WriteChainRelay::start(connector, Arc::clone(&disk_manager), &init, 0).unwrap();

        let payload = vec![5u8; 4];
        let frame = WriteData {
            version: 1,
            chunk_id: 3,
            write_id: 1,
            block: 0,
            offset: 0,
            size: 4,
            crc: crate::chunk::crc::crc32(&payload),
            payload,
        };
        assert_eq!(relay.handle_write_data(&frame), StatusCode::Ok);
        assert_eq!(relay.handle_write_end(&WriteEnd { chunk_id: 3 }), StatusCode::Ok);

        // the chunk must now be visible through the normal open/read path.
        disk_manager.open(3, 1, PartType::Standard).unwrap();
        let data = disk_manager.read(3, PartType::Standard, 0, 4).unwrap();
        assert_eq!(data, vec![5u8; 4]);
    }

    #[test]
    fn rollback_leaves_no_registered_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let disk_manager = Arc::new(DiskManager::new(vec![dir.path().to_path_buf()]));
        let connector = Arc::new(LoopbackConnector { buffer: Mutex::new(Vec::new()) });
        let init = WriteInit { chunk_id: 4, version: 1, part_type: PartType::Standard, chain: vec![] };
        let mut relay = WriteChainRelay::start(connector, Arc::clone(&disk_manager), &init, 0).unwrap();

        let frame = WriteData {
            version: 1,
            chunk_id: 4,
            write_id: 1,
            block: 0,
            offset: 0,
            size: 4,
            crc: 0xDEAD_BEEF,
            payload: vec![1, 2, 3, 4],
        };
        relay.handle_write_data(&frame);
        assert_eq!(relay.handle_write_end(&WriteEnd { chunk_id: 4 }), StatusCode::NotDone);

        let err = disk_manager.open(4, 1, PartType::Standard).unwrap_err();
        assert!(matches!(err, ChunkserverError::ChunkNotFound { .. }));
    }
}
