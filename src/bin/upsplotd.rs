//! upsplotd - UPS sampling daemon.
//!
//! Polls a NUT daemon on a wall-clock-aligned cadence and stores one
//! averaged row per report interval into a SQLite database.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use upsplot::client::{UpsClient, UpsSpec};
use upsplot::daemon::{self, DaemonConfig};
use upsplot::schedule::Cadence;
use upsplot::storage::SqliteStore;

/// UPS sampling daemon.
#[derive(Parser)]
#[command(name = "upsplotd", about = "UPS sampling daemon", version)]
struct Args {
    /// UPS to poll, as name@host[:port].
    #[arg(short, long, default_value = "ups@localhost")]
    ups: String,

    /// SQLite database file.
    #[arg(short, long, default_value = "./upsdata.sqlite3")]
    database: PathBuf,

    /// Report interval in seconds. One averaged row is stored per
    /// interval.
    #[arg(short, long, default_value = "180")]
    report_interval: u64,

    /// Samples taken per report interval.
    #[arg(short, long, default_value = "3")]
    samples: u32,

    /// Socket timeout for the NUT connection, in seconds.
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Pause before the single retry of a failed poll, in seconds.
    #[arg(long, default_value = "10")]
    retry_delay: u64,

    /// Poll one sample, print it as JSON and exit.
    #[arg(long)]
    once: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("upsplotd={}", level).parse().unwrap())
        .add_directive(format!("upsplot={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let spec = match UpsSpec::parse(&args.ups) {
        Ok(spec) => spec,
        Err(e) => {
            error!("Invalid --ups value: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut client = UpsClient::new(spec, Duration::from_secs(args.timeout));

    if args.once {
        return run_once(&mut client);
    }

    let cadence = match Cadence::new(Duration::from_secs(args.report_interval), args.samples) {
        Ok(cadence) => cadence,
        Err(e) => {
            error!("Invalid cadence: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("upsplotd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: ups={}, database={}, report_interval={}s, samples={}",
        client.spec(),
        args.database.display(),
        args.report_interval,
        args.samples
    );

    let store = match SqliteStore::open(&args.database) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open database {}: {}", args.database.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match client.try_connect() {
        Ok(()) => info!("NUT daemon: connected to {}", client.spec()),
        Err(e) => warn!("NUT daemon not reachable yet ({}), polling will retry", e),
    }

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let config = DaemonConfig {
        cadence,
        retry_delay: Duration::from_secs(args.retry_delay),
    };

    match daemon::run(&mut client, &store, &config, &running) {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Daemon terminated: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Polls a single sample and prints it as JSON (diagnostic mode).
fn run_once(client: &mut UpsClient) -> ExitCode {
    match client.read_sample() {
        Ok(sample) => match serde_json::to_string_pretty(&sample) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to serialize sample: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("UPS poll failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
