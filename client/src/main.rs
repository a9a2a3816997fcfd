//! Cryptback - Encrypted File Backup Client
//!
//! Registers with a backup server, receives an AES session key wrapped
//! with our RSA key, uploads the file encrypted and confirms its checksum.

mod config;
mod persist;
mod runner;
mod session;
mod transport;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::Parser;
use protocol::WireRevision;
use runner::{AbortRegistry, BackupJob};
use session::ErrorKind;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "client.toml";

#[derive(Parser, Debug)]
#[command(name = "cryptback")]
#[command(version)]
#[command(about = "Encrypted file backup client", long_about = None)]
struct Args {
    /// Configuration file path [default: client.toml, optional]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transfer info file (host:port, username, file). Repeat to run several backups in parallel
    #[arg(short, long)]
    info: Vec<PathBuf>,

    /// RSA private key file (DER)
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Generate the private key if the key file does not exist
    #[arg(long)]
    generate_key: bool,

    /// Server wire revision: shared or extended
    #[arg(long)]
    wire_revision: Option<WireRevision>,

    /// Re-uploads allowed after a CRC mismatch
    #[arg(long)]
    retries: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid logging level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Cryptback v{}", env!("CARGO_PKG_VERSION"));

    let key_path = args.key.clone().unwrap_or_else(|| config.paths.private_key.clone());
    let private_key = persist::load_or_generate_key(&key_path, args.generate_key)?;
    info!("Loaded private key from {:?}", key_path);

    let info_paths = if args.info.is_empty() {
        vec![config.paths.transfer_info.clone()]
    } else {
        args.info.clone()
    };
    let jobs = info_paths
        .iter()
        .map(BackupJob::load)
        .collect::<Result<Vec<_>>>()?;

    let settings = runner::session_settings(&config)?;
    let connect_timeout = config.network.connect_timeout();
    let registry = AbortRegistry::new();
    let total = jobs.len();
    info!(
        "Running {} backup(s), wire revision {}",
        total, settings.wire_revision
    );

    let mut tasks = JoinSet::new();
    for job in jobs {
        let key = private_key.clone();
        let settings = settings.clone();
        let registry = registry.clone();
        let span = info_span!("job", label = %job.label);
        tasks.spawn_blocking(move || {
            let _entered = span.enter();
            let result = runner::run_job(&job, key, settings, connect_timeout, &registry);
            (job, result)
        });
    }

    let mut failures = 0;
    let mut interrupted = false;
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok((job, Ok(report)))) => {
                    println!(
                        "{}: backed up {} ({} bytes, {} packet(s), crc {}, {} attempt(s)) as client {}",
                        job.label,
                        report.filename,
                        report.original_size,
                        report.packets,
                        report.crc,
                        report.attempts,
                        report.client_id
                    );
                }
                Some(Ok((job, Err(e)))) if e.kind() == ErrorKind::Cancelled => {
                    failures += 1;
                    println!("{}: cancelled", job.label);
                }
                Some(Ok((job, Err(e)))) => {
                    failures += 1;
                    println!("{}: FAILED [{}] {}", job.label, e.kind(), e);
                }
                Some(Err(e)) => {
                    failures += 1;
                    error!("Backup task failed to complete: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let aborted = registry.abort_all();
                warn!("Interrupted, aborting {} job(s)", aborted);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} backup(s) failed", failures, total);
    }
    Ok(())
}

/// Load the config file, falling back to defaults when the default file is absent
fn load_config(args: &Args) -> Result<config::Config> {
    let mut config = match &args.config {
        Some(path) => config::Config::load(path)?,
        None if std::path::Path::new(DEFAULT_CONFIG).exists() => config::Config::load(DEFAULT_CONFIG)?,
        None => config::Config::default(),
    };

    if let Some(revision) = args.wire_revision {
        config.protocol.wire_revision = revision.to_string();
    }
    if let Some(retries) = args.retries {
        config.protocol.crc_retries = retries;
    }
    config.validate()?;
    Ok(config)
}
