//! C4 — job pool: fixed worker threads draining a typed job queue, with a
//! status pipe an external event loop can poll on.
//!
//! Grounded on `examples/original_source/src/chunkserver/bgjobs.cc` for the
//! op table, job-state machine, and pipe-wakeup discipline, and on the
//! worker-thread idiom in
//! `examples/proxmox-proxmox-backup/src/tools/parallel_handler.rs`
//! (bounded channel feeding a fixed `Vec<JoinHandle<()>>`, a shared status
//! sink instead of `bgjobs.cc`'s hand-rolled `jobid & 0x3FF` hash table —
//! `std::collections::HashMap` already gives us that behavior without
//! reimplementing open chaining).

pub mod job;

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use nix::unistd;

pub use job::{JobBody, JobCallback, JobState, OpCode};
use job::JobRecord;

use crate::error::StatusCode;

struct JobMessage {
    job_id: u32,
    body: JobBody,
}

struct Shared {
    jobs: Mutex<HashMap<u32, JobRecord>>,
    status_queue: Mutex<VecDeque<(u32, StatusCode)>>,
    pipe_nonempty: AtomicBool,
    wpipe: RawFd,
}

/// A bounded pool of worker threads executing [`job::JobBody`]s and
/// reporting completions through a status queue plus a wakeup pipe.
pub struct JobPool {
    shared: Arc<Shared>,
    job_tx: Sender<JobMessage>,
    workers: Vec<JoinHandle<()>>,
    next_job_id: AtomicU32,
    rpipe: RawFd,
}

impl JobPool {
    /// Spawns `worker_threads` workers. A pool with zero workers still
    /// accepts `job_new` calls but every job immediately completes with
    /// [`StatusCode::NotDone`] (see `SPEC_FULL.md` §8: "a job pool with
    /// W=0 workers rejects all submissions with NOT_DONE").
    pub fn new(worker_threads: usize) -> Self {
        let (rpipe, wpipe) = unistd::pipe().expect("failed to create job pool wakeup pipe");
        let shared = Arc::new(Shared {
            jobs: Mutex::new(HashMap::new()),
            status_queue: Mutex::new(VecDeque::new()),
            pipe_nonempty: AtomicBool::new(false),
            wpipe,
        });

        let (job_tx, job_rx): (Sender<JobMessage>, Receiver<JobMessage>) = bounded(1024);
        let mut workers = Vec::with_capacity(worker_threads);
        for _ in 0..worker_threads {
            let job_rx = job_rx.clone();
            let shared = Arc::clone(&shared);
            workers.push(std::thread::spawn(move || worker_loop(job_rx, shared)));
        }

        JobPool { shared, job_tx, workers, next_job_id: AtomicU32::new(1), rpipe }
    }

    /// File descriptor the owning event loop should register for
    /// readability; a single byte is written whenever the status queue
    /// transitions from empty to non-empty.
    pub fn wakeup_fd(&self) -> RawFd {
        self.rpipe
    }

    fn allocate_job_id(&self) -> u32 {
        loop {
            let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
            if id != 0 {
                return id;
            }
            // Wrapped past u32::MAX; 0 is reserved, so fetch_add again.
        }
    }

    /// Enqueues a job. Returns `None` (never invoking `callback`) only if
    /// the pool has no workers — callers get an immediate synchronous
    /// `NotDone` instead of waiting for a drain that will never progress.
    pub fn job_new(&self, op: OpCode, body: JobBody, callback: JobCallback) -> u32 {
        let job_id = self.allocate_job_id();
        if self.workers.is_empty() {
            callback(job_id, StatusCode::NotDone);
            return job_id;
        }

        {
            let mut jobs = self.shared.jobs.lock().unwrap();
            jobs.insert(job_id, JobRecord { state: JobState::Enabled, op, callback });
        }

        if self.job_tx.send(JobMessage { job_id, body }).is_err() {
            // Worker threads gone (pool shutting down): resolve inline.
            self.fail_job(job_id, StatusCode::Disconnected);
        }
        job_id
    }

    fn fail_job(&self, job_id: u32, status: StatusCode) {
        let record = self.shared.jobs.lock().unwrap().remove(&job_id);
        if let Some(record) = record {
            (record.callback)(job_id, status);
        }
    }

    /// Flips `Enabled -> Disabled`. A disabled job still runs its op
    /// handler, which short-circuits with `NotDone` instead of doing real
    /// I/O, per `SPEC_FULL.md` §4.4.
    pub fn disable_job(&self, job_id: u32) {
        let mut jobs = self.shared.jobs.lock().unwrap();
        if let Some(record) = jobs.get_mut(&job_id) {
            if record.state == JobState::Enabled {
                record.state = JobState::Disabled;
            }
        }
    }

    pub fn change_callback(&self, job_id: u32, callback: JobCallback) {
        let mut jobs = self.shared.jobs.lock().unwrap();
        if let Some(record) = jobs.get_mut(&job_id) {
            record.callback = callback;
        }
    }

    /// Disables every currently-tracked job and retargets its callback to
    /// `make_callback(job_id)`, used when the connection owning this pool
    /// is torn down. Jobs complete with whatever status their op handler
    /// produces — disabled jobs short-circuit to `NotDone`.
    pub fn disable_and_change_callback_all(&self, mut make_callback: impl FnMut(u32) -> JobCallback) {
        let mut jobs = self.shared.jobs.lock().unwrap();
        for (job_id, record) in jobs.iter_mut() {
            // Disabled regardless of current state: a job already
            // `InProgress` may have raced to completion before this call
            // and simply be waiting in the status queue to be drained, in
            // which case `check_jobs` still owes it a `NotDone`.
            record.state = JobState::Disabled;
            record.callback = make_callback(*job_id);
        }
    }

    /// Drains the wakeup pipe and the status queue, invoking each
    /// completed job's current callback. Must be called from the
    /// event-loop thread, never from a worker.
    pub fn check_jobs(&self) {
        let mut buf = [0u8; 256];
        loop {
            match unistd::read(self.rpipe, &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) if n < buf.len() => break,
                Ok(_) => continue,
            }
        }

        let completions: Vec<(u32, StatusCode)> = {
            let mut queue = self.shared.status_queue.lock().unwrap();
            let drained = queue.drain(..).collect();
            self.shared.pipe_nonempty.store(false, Ordering::SeqCst);
            drained
        };

        for (job_id, status) in completions {
            let record = self.shared.jobs.lock().unwrap().remove(&job_id);
            if let Some(record) = record {
                // Once disabled, NotDone is reported regardless of what
                // status the op handler actually produced: the handler may
                // have raced ahead of the disable call (§5: "cooperative —
                // running I/O is not interrupted, but post-completion the
                // callback is skipped[/overridden] and NOT_DONE is returned").
                let reported = if record.state == JobState::Disabled { StatusCode::NotDone } else { status };
                (record.callback)(job_id, reported);
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.job_tx.send(JobMessage { job_id: 0, body: Box::new(|| StatusCode::Ok) });
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let _ = unistd::close(self.rpipe);
        let _ = unistd::close(self.shared.wpipe);
    }
}

fn worker_loop(job_rx: Receiver<JobMessage>, shared: Arc<Shared>) {
    while let Ok(JobMessage { job_id, body }) = job_rx.recv() {
        if job_id == 0 {
            // Shutdown sentinel pushed by `Drop`.
            break;
        }

        let disabled = {
            let mut jobs = shared.jobs.lock().unwrap();
            match jobs.get_mut(&job_id) {
                Some(record) if record.state == JobState::Disabled => true,
                Some(record) => {
                    record.state = JobState::InProgress;
                    false
                }
                None => continue, // job was already resolved/removed
            }
        };

        let status = if disabled { StatusCode::NotDone } else { body() };

        let became_nonempty = {
            let mut queue = shared.status_queue.lock().unwrap();
            let was_empty = queue.is_empty();
            queue.push_back((job_id, status));
            was_empty
        };
        if became_nonempty && !shared.pipe_nonempty.swap(true, Ordering::SeqCst) {
            let _ = unistd::write(shared.wpipe, &[1u8]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn job_completes_and_invokes_callback() {
        let pool = JobPool::new(2);
        let (tx, rx) = mpsc::channel();
        pool.job_new(
            OpCode::Read,
            Box::new(|| StatusCode::Ok),
            Box::new(move |_id, status| {
                tx.send(status).unwrap();
            }),
        );
        loop {
            pool.check_jobs();
            if let Ok(status) = rx.try_recv() {
                assert_eq!(status, StatusCode::Ok);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[test]
    fn zero_workers_rejects_with_not_done() {
        let pool = JobPool::new(0);
        let (tx, rx) = mpsc::channel();
        pool.job_new(
            OpCode::Read,
            Box::new(|| StatusCode::Ok),
            Box::new(move |_id, status| tx.send(status).unwrap()),
        );
        assert_eq!(rx.recv().unwrap(), StatusCode::NotDone);
    }

    #[test]
    fn disable_and_change_callback_all_redirects_every_job() {
        let pool = JobPool::new(4);
        let (tx, rx) = mpsc::channel();
        for _ in 0..100 {
            let tx = tx.clone();
            pool.job_new(
                OpCode::Read,
                Box::new(|| StatusCode::Ok),
                Box::new(move |_id, _status| {
                    // Original callback must never fire once redirected.
                    tx.send(()).unwrap();
                }),
            );
        }

        let (done_tx, done_rx) = mpsc::channel();
        pool.disable_and_change_callback_all(|_job_id| {
            let done_tx = done_tx.clone();
            Box::new(move |_id, status| {
                assert_eq!(status, StatusCode::NotDone);
                done_tx.send(()).unwrap();
            })
        });

        let mut completed = 0;
        while completed < 100 {
            pool.check_jobs();
            while done_rx.try_recv().is_ok() {
                completed += 1;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(rx.try_recv().is_err(), "original callback must not have fired");
    }
}
