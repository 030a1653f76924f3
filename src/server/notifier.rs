//! C9 — wrong-CRC notifier: a background thread that tells peers to
//! re-check a chunk whose CRC just failed locally.
//!
//! Grounded on `examples/original_source/src/common/wrong_crc_notifier.h`:
//! a mutex+condvar guarded set of `(peer, chunk_id, version, part_type)`,
//! `report_bad_crc` inserting and notifying, a dedicated thread draining the
//! set and sending one `LIZ_CLTOCS_TEST_CHUNK` frame per entry, and
//! destruction setting a terminate flag before joining.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::chunk::PartType;
use crate::erasure::plan::PartTypeKey;
use crate::protocol::write_chain::ChunkConnector;

/// One observation of a chunk whose CRC didn't match on read, to be
/// reported to the peer that's supposed to be holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InconsistentChunk {
    pub peer: AddrKey,
    pub chunk_id: u64,
    pub version: u32,
    pub part_type: PartTypeKey,
}

/// `SocketAddr` isn't `Ord`; this is a small orderable projection used only
/// as a set key, same trick as `erasure::plan::PartTypeKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AddrKey(pub SocketAddr);

/// Sends one `LIZ_CLTOCS_TEST_CHUNK` frame to a peer. A trait so tests can
/// substitute an in-memory recorder instead of a real connection.
pub trait TestChunkSender: Send + Sync {
    fn send_test_chunk(&self, peer: SocketAddr, chunk_id: u64, version: u32, part_type: PartType);
}

/// Adapts any [`ChunkConnector`] into a [`TestChunkSender`] by opening a
/// fresh connection per report and writing the chunk identity frame;
/// connect failures are logged and swallowed, matching the original's
/// best-effort delivery (a dropped notification just means the peer finds
/// out on its own next read).
pub struct ConnectorTestChunkSender<C: ChunkConnector> {
    connector: Arc<C>,
}

impl<C: ChunkConnector> ConnectorTestChunkSender<C> {
    pub fn new(connector: Arc<C>) -> Self {
        ConnectorTestChunkSender { connector }
    }
}

impl<C: ChunkConnector> TestChunkSender for ConnectorTestChunkSender<C> {
    fn send_test_chunk(&self, peer: SocketAddr, chunk_id: u64, version: u32, part_type: PartType) {
        use crate::protocol::messages::NetworkAddress;
        use std::net::IpAddr;

        let ip = match peer.ip() {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => {
                log::warn!("wrong-crc notifier: ipv6 peers unsupported, dropping report for chunk {:016x}", chunk_id);
                return;
            }
        };
        let addr = NetworkAddress { ip, port: peer.port() };
        match self.connector.connect(addr) {
            Ok(mut stream) => {
                if let Err(e) = write_test_chunk_frame(&mut stream, chunk_id, version, part_type) {
                    log::warn!("wrong-crc notifier: failed sending TEST_CHUNK to {}: {}", peer, e);
                }
            }
            Err(e) => log::warn!("wrong-crc notifier: failed connecting to {}: {}", peer, e),
        }
    }
}

fn write_test_chunk_frame(
    w: &mut impl std::io::Write,
    chunk_id: u64,
    version: u32,
    part_type: PartType,
) -> std::io::Result<()> {
    w.write_all(&chunk_id.to_be_bytes())?;
    w.write_all(&version.to_be_bytes())?;
    w.write_all(&part_type.to_wire_id().to_be_bytes())?;
    Ok(())
}

struct Shared {
    mutex: Mutex<BTreeSet<InconsistentChunk>>,
    cond: Condvar,
    terminate: Mutex<bool>,
}

/// Owns the mutex-guarded set of inconsistent chunks and the thread that
/// drains it. Dropping the notifier sets the terminate flag, wakes the
/// thread, and joins it — there is no detached background work left
/// running once this goes out of scope.
pub struct WrongCrcNotifier {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl WrongCrcNotifier {
    pub fn start<S: TestChunkSender + 'static>(sender: Arc<S>) -> Self {
        let shared = Arc::new(Shared {
            mutex: Mutex::new(BTreeSet::new()),
            cond: Condvar::new(),
            terminate: Mutex::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || Self::run(worker_shared, sender));

        WrongCrcNotifier { shared, handle: Some(handle) }
    }

    fn run<S: TestChunkSender>(shared: Arc<Shared>, sender: Arc<S>) {
        loop {
            let drained = {
                let mut pending = shared.mutex.lock().unwrap();
                while pending.is_empty() && !*shared.terminate.lock().unwrap() {
                    pending = shared.cond.wait(pending).unwrap();
                }
                if pending.is_empty() && *shared.terminate.lock().unwrap() {
                    return;
                }
                std::mem::take(&mut *pending)
            };

            for entry in drained {
                if let Ok(part_type) = PartType::from_wire_id(entry.part_type.0) {
                    sender.send_test_chunk(entry.peer.0, entry.chunk_id, entry.version, part_type);
                }
            }

            if *shared.terminate.lock().unwrap() {
                return;
            }
        }
    }

    /// Records an observation and wakes the draining thread; does not block
    /// on delivery.
    pub fn report_bad_crc(&self, peer: SocketAddr, chunk_id: u64, version: u32, part_type: PartType) {
        let entry = InconsistentChunk { peer: AddrKey(peer), chunk_id, version, part_type: PartTypeKey::from(part_type) };
        self.shared.mutex.lock().unwrap().insert(entry);
        self.shared.cond.notify_one();
    }
}

impl Drop for WrongCrcNotifier {
    fn drop(&mut self) {
        *self.shared.terminate.lock().unwrap() = true;
        self.shared.cond.notify_one();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                log::error!("wrong-crc notifier thread panicked: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::XorPart;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::mpsc;
    use std::time::Duration;

    struct RecordingSender {
        tx: Mutex<mpsc::Sender<(SocketAddr, u64, u32, PartType)>>,
    }

    impl TestChunkSender for RecordingSender {
        fn send_test_chunk(&self, peer: SocketAddr, chunk_id: u64, version: u32, part_type: PartType) {
            let _ = self.tx.lock().unwrap().send((peer, chunk_id, version, part_type));
        }
    }

    #[test]
    fn report_bad_crc_delivers_exactly_one_frame_within_a_second() {
        let (tx, rx) = mpsc::channel();
        let sender = Arc::new(RecordingSender { tx: Mutex::new(tx) });
        let notifier = WrongCrcNotifier::start(sender);

        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 9422);
        let part_type = PartType::Xor { level: 3, part: XorPart::Data(2) };
        notifier.report_bad_crc(peer, 2, 3, part_type);

        let (got_peer, chunk_id, version, got_part) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(got_peer, peer);
        assert_eq!(chunk_id, 2);
        assert_eq!(version, 3);
        assert_eq!(got_part, part_type);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drop_terminates_the_background_thread() {
        let (tx, _rx) = mpsc::channel();
        let sender = Arc::new(RecordingSender { tx: Mutex::new(tx) });
        let notifier = WrongCrcNotifier::start(sender);
        drop(notifier);
        // reaching this point without hanging proves the thread joined.
    }
}
