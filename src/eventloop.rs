//! C10 — abstract event-loop contract.
//!
//! Grounded on `examples/original_source/mfscommon/main.h`'s
//! `main_pollregister`/`main_timeregister`/`main_destructregister`/
//! `main_reloadregister`/`main_wantexitregister`/`main_canexitregister`
//! family: void-function-pointer callbacks registered once at startup and
//! invoked by a single poll loop. Per `SPEC_FULL.md` §9 (Design notes), the
//! `void *` callback registration becomes trait objects behind typed
//! registration methods rather than raw function pointers, and
//! `TIMEMODE_SKIP/RUNONCE/RUNALL` becomes the `TimerMode` enum.

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags};

type VoidCallback = Box<dyn FnMut() + Send>;
type CanExitCallback = Box<dyn FnMut() -> bool + Send>;

/// How a timer behaves when the loop falls behind schedule (mirrors
/// `TIMEMODE_SKIP`/`TIMEMODE_RUNONCE`/`TIMEMODE_RUNALL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Drop any ticks the loop missed; fire once and resync to `now`.
    SkipLate,
    /// Same as `SkipLate` — kept distinct because the original
    /// distinguishes "ran once to catch up" from "skipped" in its stats,
    /// even though both leave the schedule resynced to `now`.
    RunOnce,
    /// Fire once per missed tick before resuming live, so a callback that
    /// must observe every period (e.g. chart bucket rollover) never skips
    /// one even if the loop briefly stalled.
    RunAll,
}

/// A component that wants its file descriptors polled for readability and
/// to be told which of them became ready.
pub trait Pollable: Send {
    fn descriptors(&self) -> Vec<RawFd>;
    fn serve(&mut self, ready: &[RawFd]);
}

struct Timer {
    mode: TimerMode,
    period: Duration,
    next_fire: Instant,
    callback: VoidCallback,
}

/// Owns every callback and pollable registered with the loop and drives one
/// iteration at a time via [`EventLoop::run_once`]. Dropping the loop fires
/// every destruct callback, the same guarantee `main_destructregister`'s
/// callbacks get at process shutdown in the original.
pub struct EventLoop {
    start: Instant,
    pollables: Vec<Box<dyn Pollable>>,
    timers: Vec<Timer>,
    destruct: Vec<VoidCallback>,
    reload: Vec<VoidCallback>,
    want_exit: Vec<VoidCallback>,
    can_exit: Vec<CanExitCallback>,
}

impl EventLoop {
    pub fn new() -> Self {
        EventLoop {
            start: Instant::now(),
            pollables: Vec::new(),
            timers: Vec::new(),
            destruct: Vec::new(),
            reload: Vec::new(),
            want_exit: Vec::new(),
            can_exit: Vec::new(),
        }
    }

    pub fn register_pollable(&mut self, pollable: Box<dyn Pollable>) {
        self.pollables.push(pollable);
    }

    pub fn register_time(&mut self, mode: TimerMode, period: Duration, callback: VoidCallback) {
        self.timers.push(Timer { mode, period, next_fire: Instant::now() + period, callback });
    }

    pub fn register_destruct(&mut self, callback: VoidCallback) {
        self.destruct.push(callback);
    }

    pub fn register_reload(&mut self, callback: VoidCallback) {
        self.reload.push(callback);
    }

    pub fn register_want_exit(&mut self, callback: VoidCallback) {
        self.want_exit.push(callback);
    }

    pub fn register_can_exit(&mut self, callback: CanExitCallback) {
        self.can_exit.push(callback);
    }

    /// Seconds since the loop started, for components that want a coarse
    /// monotonic clock without depending on `std::time` directly (mirrors
    /// `main_time()`).
    pub fn main_time(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    /// Microseconds since the loop started (mirrors the original's
    /// finer-grained `main_utime()`, used by timers needing sub-second
    /// precision).
    pub fn main_utime(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Runs every registered reload callback (e.g. on `SIGHUP`).
    pub fn reload(&mut self) {
        for callback in &mut self.reload {
            callback();
        }
    }

    /// Runs every want-exit callback, telling components to start winding
    /// down in-flight work.
    pub fn request_exit(&mut self) {
        for callback in &mut self.want_exit {
            callback();
        }
    }

    /// `true` once every registered component reports it's safe to exit.
    pub fn can_exit(&mut self) -> bool {
        self.can_exit.iter_mut().all(|callback| callback())
    }

    /// Fires any timers whose period elapsed, then polls every registered
    /// pollable's descriptors once, blocking up to `timeout`.
    pub fn run_once(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.fire_due_timers();
        self.poll_once(timeout)
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        for timer in &mut self.timers {
            if now < timer.next_fire {
                continue;
            }
            match timer.mode {
                TimerMode::SkipLate | TimerMode::RunOnce => {
                    (timer.callback)();
                    timer.next_fire = now + timer.period;
                }
                TimerMode::RunAll => {
                    while now >= timer.next_fire {
                        (timer.callback)();
                        timer.next_fire += timer.period;
                    }
                }
            }
        }
    }

    fn poll_once(&mut self, timeout: Duration) -> std::io::Result<()> {
        let mut owners: Vec<usize> = Vec::new();
        let mut fds: Vec<RawFd> = Vec::new();
        let mut pollfds: Vec<PollFd> = Vec::new();
        for (idx, pollable) in self.pollables.iter().enumerate() {
            for fd in pollable.descriptors() {
                owners.push(idx);
                fds.push(fd);
                pollfds.push(PollFd::new(fd, PollFlags::POLLIN));
            }
        }

        if pollfds.is_empty() {
            std::thread::sleep(timeout);
            return Ok(());
        }

        poll(&mut pollfds, timeout.as_millis() as i32)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("poll failed: {}", e)))?;

        let mut ready_per_pollable: Vec<Vec<RawFd>> = vec![Vec::new(); self.pollables.len()];
        for ((pollfd, &owner), &fd) in pollfds.iter().zip(owners.iter()).zip(fds.iter()) {
            if pollfd.revents().map(|r| r.contains(PollFlags::POLLIN)).unwrap_or(false) {
                ready_per_pollable[owner].push(fd);
            }
        }

        for (idx, ready) in ready_per_pollable.into_iter().enumerate() {
            if !ready.is_empty() {
                self.pollables[idx].serve(&ready);
            }
        }
        Ok(())
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        for callback in &mut self.destruct {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn destruct_callbacks_fire_on_drop() {
        let count = Arc::new(AtomicU32::new(0));
        {
            let mut loop_ = EventLoop::new();
            let count = Arc::clone(&count);
            loop_.register_destruct(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_all_timer_fires_once_per_missed_period() {
        let count = Arc::new(AtomicU32::new(0));
        let mut loop_ = EventLoop::new();
        let counter = Arc::clone(&count);
        loop_.register_time(TimerMode::RunAll, Duration::from_millis(1), Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        std::thread::sleep(Duration::from_millis(25));
        loop_.run_once(Duration::from_millis(1)).unwrap();
        assert!(count.load(Ordering::SeqCst) >= 10);
    }

    #[test]
    fn can_exit_requires_every_registered_check_to_agree() {
        let mut loop_ = EventLoop::new();
        loop_.register_can_exit(Box::new(|| true));
        loop_.register_can_exit(Box::new(|| false));
        assert!(!loop_.can_exit());
    }

    #[test]
    fn no_pollables_falls_back_to_sleeping_the_timeout() {
        let mut loop_ = EventLoop::new();
        let start = Instant::now();
        loop_.run_once(Duration::from_millis(10)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
