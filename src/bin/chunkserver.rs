//! Process entry point: loads configuration, starts logging, and wires the
//! disk manager, job pool, stats table and wrong-CRC notifier together
//! behind the abstract event loop (C10).
//!
//! Grounded on `examples/wofferl-proxmox-backup`'s daemon binaries for the
//! `env_logger` init / config load / component startup ordering, adapted
//! to this core's blocking-thread model instead of that teacher's
//! `tokio`-async daemons.

use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use chunkserver_core::config::Config;
use chunkserver_core::eventloop::{EventLoop, Pollable};
use chunkserver_core::hdd::DiskManager;
use chunkserver_core::jobpool::JobPool;
use chunkserver_core::protocol::TcpChunkConnector;
use chunkserver_core::server::{ConnectorTestChunkSender, WrongCrcNotifier};
use chunkserver_core::stats::ChunkserverStats;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: i32) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Registers the job pool's wakeup pipe with the event loop; a readable
/// byte means `check_jobs` has completions to drain.
struct JobPoolPollable(Arc<JobPool>);

impl Pollable for JobPoolPollable {
    fn descriptors(&self) -> Vec<RawFd> {
        vec![self.0.wakeup_fd()]
    }

    fn serve(&mut self, _ready: &[RawFd]) {
        self.0.check_jobs();
    }
}

fn install_signal_handlers() -> Result<()> {
    use nix::sys::signal::{signal, SigHandler, Signal};
    unsafe {
        signal(Signal::SIGINT, SigHandler::Handler(request_shutdown))?;
        signal(Signal::SIGTERM, SigHandler::Handler(request_shutdown))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "/etc/lizardfs/chunkserver.toml".to_string());
    let config = Config::load(&config_path).with_context(|| format!("loading config from {}", config_path))?;

    let disk_manager = Arc::new(DiskManager::new(config.disk_roots.clone()));
    log::info!("scanning {} disk root(s)", disk_manager.disks().len());
    disk_manager.scan_all();

    // Shared by the read service and replicator once the embedding daemon
    // wires those up behind real network connections.
    let _stats = ChunkserverStats::new(config.defective_timeout());

    let job_pool = Arc::new(JobPool::new(config.worker_threads));
    log::info!("job pool started with {} worker thread(s)", job_pool.worker_count());

    let connector = Arc::new(TcpChunkConnector::new(Ipv4Addr::UNSPECIFIED));
    let sender = Arc::new(ConnectorTestChunkSender::new(Arc::clone(&connector)));
    let notifier = WrongCrcNotifier::start(sender);

    install_signal_handlers()?;

    let mut event_loop = EventLoop::new();
    event_loop.register_pollable(Box::new(JobPoolPollable(Arc::clone(&job_pool))));
    // No in-flight-job accounting is exposed yet, so shutdown proceeds as
    // soon as it's requested; a future `JobPool::pending_count` would slot
    // in here to drain outstanding work first.
    event_loop.register_can_exit(Box::new(|| true));

    log::info!("chunkserver core ready to serve on {}", config.bind_address);
    log::info!(
        "replicator timeouts: wave={:?} connection={:?} total={:?}",
        config.replicator_wave_timeout(),
        config.replicator_connection_timeout(),
        config.replicator_total_timeout(),
    );

    // Binding the write-chain and read-protocol listeners is the embedding
    // daemon's job; this entry point only proves out startup/shutdown
    // ordering for the data-plane components it owns directly.
    while !SHUTDOWN.load(Ordering::Relaxed) {
        event_loop.run_once(Duration::from_millis(200))?;
    }

    event_loop.request_exit();
    while !event_loop.can_exit() {
        std::thread::sleep(Duration::from_millis(50));
    }

    log::info!("shutting down");
    drop(notifier);
    Ok(())
}
