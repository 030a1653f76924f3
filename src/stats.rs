//! C5 — chunkserver stats (per-peer pending-op counters and the defective
//! flag) and the C10 chart-data aggregator.
//!
//! Grounded on `examples/original_source/src/mount/chunkserver_stats.h`
//! and `mfsmount/chunkserver_stats.cc`: a mutex-protected peer map, a
//! 2000 ms defective timeout, and a proxy that unregisters everything it
//! registered when it's dropped — which is exactly what a destructor does
//! in the original and what `Drop` gives us here for free.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
struct ChunkserverStatsEntry {
    pending_reads: u32,
    pending_writes: u32,
    defective_until: Option<Instant>,
}

impl ChunkserverStatsEntry {
    fn is_defective(&self, now: Instant) -> bool {
        self.defective_until.map(|until| now < until).unwrap_or(false)
    }

    /// Lower is preferred for replica selection; a defective peer is
    /// pushed to the back regardless of its pending-op counts.
    fn score(&self, now: Instant) -> u64 {
        if self.is_defective(now) {
            u64::MAX
        } else {
            (self.pending_reads + self.pending_writes) as u64
        }
    }
}

pub struct ChunkserverStats {
    defective_timeout: Duration,
    peers: Mutex<HashMap<SocketAddr, ChunkserverStatsEntry>>,
}

impl ChunkserverStats {
    pub fn new(defective_timeout: Duration) -> Arc<Self> {
        Arc::new(ChunkserverStats { defective_timeout, peers: Mutex::new(HashMap::new()) })
    }

    pub fn register_read_op(&self, addr: SocketAddr) {
        self.peers.lock().unwrap().entry(addr).or_default().pending_reads += 1;
    }

    pub fn unregister_read_op(&self, addr: SocketAddr) {
        if let Some(entry) = self.peers.lock().unwrap().get_mut(&addr) {
            entry.pending_reads = entry.pending_reads.saturating_sub(1);
        }
    }

    pub fn register_write_op(&self, addr: SocketAddr) {
        self.peers.lock().unwrap().entry(addr).or_default().pending_writes += 1;
    }

    pub fn unregister_write_op(&self, addr: SocketAddr) {
        if let Some(entry) = self.peers.lock().unwrap().get_mut(&addr) {
            entry.pending_writes = entry.pending_writes.saturating_sub(1);
        }
    }

    pub fn mark_defective(&self, addr: SocketAddr) {
        let until = Instant::now() + self.defective_timeout;
        self.peers.lock().unwrap().entry(addr).or_default().defective_until = Some(until);
    }

    pub fn mark_working(&self, addr: SocketAddr) {
        if let Some(entry) = self.peers.lock().unwrap().get_mut(&addr) {
            entry.defective_until = None;
        }
    }

    pub fn is_defective(&self, addr: SocketAddr) -> bool {
        self.peers.lock().unwrap().get(&addr).map(|e| e.is_defective(Instant::now())).unwrap_or(false)
    }

    /// Lowest score first: the preferred order for replica selection.
    pub fn rank_peers(&self, candidates: &[SocketAddr]) -> Vec<SocketAddr> {
        let now = Instant::now();
        let peers = self.peers.lock().unwrap();
        let mut ranked: Vec<SocketAddr> = candidates.to_vec();
        ranked.sort_by_key(|addr| peers.get(addr).map(|e| e.score(now)).unwrap_or(0));
        ranked
    }

    /// Marks every peer with outstanding reads or writes defective at once,
    /// used when the connection/session that was tracking them dies.
    pub fn all_pending_defective(&self) {
        let until = Instant::now() + self.defective_timeout;
        let mut peers = self.peers.lock().unwrap();
        for entry in peers.values_mut() {
            if entry.pending_reads > 0 || entry.pending_writes > 0 {
                entry.defective_until = Some(until);
            }
        }
    }
}

/// RAII guard: remembers every op it registered and unregisters all of
/// them on drop, regardless of which exit path was taken.
pub struct ChunkserverStatsProxy {
    stats: Arc<ChunkserverStats>,
    reads: Vec<SocketAddr>,
    writes: Vec<SocketAddr>,
}

impl ChunkserverStatsProxy {
    pub fn new(stats: Arc<ChunkserverStats>) -> Self {
        ChunkserverStatsProxy { stats, reads: Vec::new(), writes: Vec::new() }
    }

    pub fn register_read_op(&mut self, addr: SocketAddr) {
        self.stats.register_read_op(addr);
        self.reads.push(addr);
    }

    pub fn register_write_op(&mut self, addr: SocketAddr) {
        self.stats.register_write_op(addr);
        self.writes.push(addr);
    }
}

impl Drop for ChunkserverStatsProxy {
    fn drop(&mut self) {
        for addr in self.reads.drain(..) {
            self.stats.unregister_read_op(addr);
        }
        for addr in self.writes.drain(..) {
            self.stats.unregister_write_op(addr);
        }
    }
}

/// C10 — a ring buffer of hourly counters, persisted as JSON
/// (`DESIGN.md`, Open Question 4) rather than the original's bespoke
/// `csstats.mfs` binary layout.
pub mod chart {
    use serde::{Deserialize, Serialize};
    use std::path::Path;

    const HOURS: usize = 24;

    #[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
    pub struct HourlyBucket {
        pub reads: u64,
        pub writes: u64,
        pub repairs: u64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChartData {
        buckets: Vec<HourlyBucket>,
        cursor: usize,
    }

    impl Default for ChartData {
        fn default() -> Self {
            ChartData { buckets: vec![HourlyBucket::default(); HOURS], cursor: 0 }
        }
    }

    impl ChartData {
        pub fn record_read(&mut self) {
            self.buckets[self.cursor].reads += 1;
        }

        pub fn record_write(&mut self) {
            self.buckets[self.cursor].writes += 1;
        }

        pub fn record_repair(&mut self) {
            self.buckets[self.cursor].repairs += 1;
        }

        /// Called once per hour by the C10 timer to roll over to the next
        /// bucket, overwriting the oldest one.
        pub fn roll_hour(&mut self) {
            self.cursor = (self.cursor + 1) % HOURS;
            self.buckets[self.cursor] = HourlyBucket::default();
        }

        pub fn buckets(&self) -> &[HourlyBucket] {
            &self.buckets
        }

        pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
            let text = serde_json::to_string(self)?;
            std::fs::write(path, text)?;
            Ok(())
        }

        pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn defective_flag_expires_after_timeout() {
        let stats = ChunkserverStats::new(Duration::from_millis(20));
        stats.mark_defective(addr(1));
        assert!(stats.is_defective(addr(1)));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!stats.is_defective(addr(1)));
    }

    #[test]
    fn proxy_unregisters_everything_on_drop() {
        let stats = ChunkserverStats::new(Duration::from_millis(2000));
        {
            let mut proxy = ChunkserverStatsProxy::new(Arc::clone(&stats));
            proxy.register_read_op(addr(1));
            proxy.register_write_op(addr(1));
        }
        let ranked = stats.rank_peers(&[addr(1)]);
        assert_eq!(ranked, vec![addr(1)]);
        // pending counters back at zero: a fresh read op should be the
        // only outstanding op, not accumulate on top of the dropped ones.
        stats.register_read_op(addr(1));
        stats.unregister_read_op(addr(1));
    }

    #[test]
    fn all_pending_defective_marks_peers_with_outstanding_ops() {
        let stats = ChunkserverStats::new(Duration::from_millis(2000));
        stats.register_read_op(addr(1));
        stats.all_pending_defective();
        assert!(stats.is_defective(addr(1)));
    }

    #[test]
    fn chart_roll_hour_advances_cursor_and_resets_it() {
        let mut chart = chart::ChartData::default();
        chart.record_read();
        assert_eq!(chart.buckets()[0].reads, 1);
        chart.roll_hour();
        // the old bucket's count is preserved...
        assert_eq!(chart.buckets()[0].reads, 1);
        // ...and the new current bucket starts clean.
        chart.record_write();
        assert_eq!(chart.buckets()[1].reads, 0);
        assert_eq!(chart.buckets()[1].writes, 1);
    }
}
