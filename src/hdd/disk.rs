//! A single disk root: capacity accounting and the damaged-disk flag.
//!
//! Grounded on `examples/wofferl-proxmox-backup/src/tools/disks.rs`'s
//! cached-snapshot style (a struct holding what was last observed, with an
//! explicit refresh rather than querying the OS on every call).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicBool, Ordering};
use std::time::Instant;

const IO_ERROR_WINDOW_SECS: u64 = 60;
const IO_ERROR_THRESHOLD: u32 = 3;

pub struct Disk {
    pub root: PathBuf,
    used_bytes: AtomicU64,
    total_bytes: AtomicU64,
    damaged: AtomicBool,
    error_count: AtomicU32,
    window_start: std::sync::Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, Copy)]
pub struct DiskStats {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub damaged: bool,
}

impl Disk {
    pub fn new(root: PathBuf, total_bytes: u64) -> Self {
        Disk {
            root,
            used_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(total_bytes),
            damaged: AtomicBool::new(false),
            error_count: AtomicU32::new(0),
            window_start: std::sync::Mutex::new(None),
        }
    }

    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed).saturating_sub(self.used_bytes.load(Ordering::Relaxed))
    }

    pub fn add_used(&self, bytes: u64) {
        self.used_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub_used(&self, bytes: u64) {
        self.used_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn is_damaged(&self) -> bool {
        self.damaged.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> DiskStats {
        DiskStats {
            used_bytes: self.used_bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            damaged: self.is_damaged(),
        }
    }

    /// Records an I/O error; marks the disk damaged once 3 errors land
    /// within a 60 s window (`SPEC_FULL.md` §4.2 / §7).
    pub fn record_io_error(&self) {
        let mut window_start = self.window_start.lock().unwrap();
        let now = Instant::now();
        let within_window = window_start.map(|start| now.duration_since(start).as_secs() < IO_ERROR_WINDOW_SECS).unwrap_or(false);

        if !within_window {
            *window_start = Some(now);
            self.error_count.store(1, Ordering::Relaxed);
            return;
        }

        let count = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= IO_ERROR_THRESHOLD {
            self.damaged.store(true, Ordering::Relaxed);
            log::error!("disk {} marked damaged after {} I/O errors within {}s", self.root.display(), count, IO_ERROR_WINDOW_SECS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_errors_within_window_marks_damaged() {
        let disk = Disk::new(PathBuf::from("/tmp/disk1"), 1_000_000);
        disk.record_io_error();
        assert!(!disk.is_damaged());
        disk.record_io_error();
        assert!(!disk.is_damaged());
        disk.record_io_error();
        assert!(disk.is_damaged());
    }

    #[test]
    fn free_bytes_tracks_usage() {
        let disk = Disk::new(PathBuf::from("/tmp/disk1"), 1000);
        disk.add_used(200);
        assert_eq!(disk.free_bytes(), 800);
        disk.sub_used(50);
        assert_eq!(disk.free_bytes(), 850);
    }
}
