use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use shmring_core::app::run_consumer;
use shmring_core::config::Config;
use shmring_core::logging;
use shmring_core::shutdown::ShutdownToken;

#[derive(Parser, Debug)]
#[command(name = "shmring-consumer")]
#[command(about = "Drains the shared ring and prints every record", long_about = None)]
struct Opts {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of records in the ring
    #[arg(short = 'M', long)]
    capacity: Option<usize>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    logging::init(opts.verbose);

    let mut config = Config::load_or_default(opts.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(capacity) = opts.capacity {
        config.capacity = capacity;
    }
    config.validate().context("invalid configuration")?;
    debug!(?config, "consumer configuration");

    let token = ShutdownToken::new();
    token
        .install_signal_handlers()
        .context("failed to install signal handlers")?;

    let stats = run_consumer(&config, &token, |record| {
        info!(
            producer = record.producer_id,
            sequence = record.sequence,
            payload = %record.payload_text(),
            "record"
        );
    })
    .context("consumer failed")?;

    info!(
        received = stats.received,
        missed = stats.missed,
        drains = stats.drains,
        recoveries = stats.recoveries,
        "consumer finished"
    );
    Ok(())
}
