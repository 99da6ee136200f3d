use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, error, info, warn};

use shmring_core::app::run_producer;
use shmring_core::config::Config;
use shmring_core::doorbell::Doorbell;
use shmring_core::logging;
use shmring_core::ring::RingBuffer;
use shmring_core::shutdown::ShutdownToken;
use shmring_core::worker::{core_for_worker, pin_current_to_core, PinningResult, WorkerPool};

#[derive(Parser, Debug)]
#[command(name = "shmring-producer")]
#[command(about = "Writes random records into the shared ring", long_about = None)]
struct Opts {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of records in the ring
    #[arg(short = 'M', long)]
    capacity: Option<usize>,

    /// Number of producer processes
    #[arg(short = 'N', long)]
    producers: Option<usize>,

    /// Pin each producer to its own core
    #[arg(long)]
    pin: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Run a single producer loop (used for spawned workers)
    #[arg(long, hide = true)]
    worker: bool,

    /// Core to pin this worker to
    #[arg(long, hide = true)]
    core: Option<usize>,
}

fn load_config(opts: &Opts) -> anyhow::Result<Config> {
    let mut config = Config::load_or_default(opts.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(capacity) = opts.capacity {
        config.capacity = capacity;
    }
    if let Some(producers) = opts.producers {
        config.producers = producers;
    }
    config.pin_workers |= opts.pin;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn pin(core: usize) {
    match pin_current_to_core(core) {
        PinningResult::Success => debug!(core, "pinned producer"),
        PinningResult::SuccessDifferentCore(actual) => {
            warn!(requested = core, actual, "pinned producer to a different core")
        }
        PinningResult::Unsupported => warn!("core pinning is not supported here"),
        PinningResult::Failed => warn!(core, "failed to pin producer"),
    }
}

fn run_single(config: &Config, token: &ShutdownToken) -> anyhow::Result<()> {
    let stats = run_producer(config, token).context("producer failed")?;
    debug!(?stats, "producer finished");
    Ok(())
}

fn run_pool(opts: &Opts, config: &Config, token: &ShutdownToken) -> anyhow::Result<()> {
    // Held for the pool's lifetime so the names outlive any single worker.
    let ring = RingBuffer::open(config.segment_options()).context("failed to open ring")?;
    let _doorbell = Doorbell::open(&config.doorbell_name).context("failed to open doorbell")?;
    info!(segment = ring.name(), capacity = ring.capacity(), "ring ready");

    let exe = std::env::current_exe().context("failed to locate producer executable")?;
    let mut pool = WorkerPool::spawn(config.producers, |index| {
        let mut cmd = Command::new(&exe);
        cmd.arg("--worker")
            .arg("--capacity")
            .arg(config.capacity.to_string());
        if let Some(path) = &opts.config {
            cmd.arg("--config").arg(path);
        }
        if opts.verbose {
            cmd.arg("--verbose");
        }
        if config.pin_workers {
            cmd.arg("--core").arg(core_for_worker(index).to_string());
        }
        cmd
    })
    .context("failed to spawn producer workers")?;
    info!(workers = pool.len(), pids = ?pool.pids(), "producer pool running");

    if !pool.supervise(token, config.poll_interval()) {
        info!("shutdown requested, stopping workers");
        pool.terminate();
    }

    let report = pool.wait();
    if report.failed > 0 {
        error!(failed = report.failed, total = pool.len(), "producer workers failed");
        bail!("{} of {} producer workers failed", report.failed, pool.len());
    }
    info!(exited = report.exited, "all producer workers stopped");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    logging::init(opts.verbose);

    let config = load_config(&opts)?;
    debug!(?config, "producer configuration");

    let token = ShutdownToken::new();
    token
        .install_signal_handlers()
        .context("failed to install signal handlers")?;

    if opts.worker || config.producers == 1 {
        if let Some(core) = opts.core {
            pin(core);
        } else if config.pin_workers {
            pin(core_for_worker(0));
        }
        return run_single(&config, &token);
    }

    run_pool(&opts, &config, &token)
}
