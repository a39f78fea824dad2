//! upsplot - trend graph renderer.
//!
//! Reads stored UPS history and renders SVG trend charts for the
//! requested periods.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{Local, Utc};
use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use upsplot::storage::SqliteStore;
use upsplot::trend::{self, Period, render};

/// Render trend graphs from stored UPS history.
#[derive(Parser)]
#[command(name = "upsplot", about = "Render UPS trend graphs", version)]
struct Args {
    /// Hour-level trend over the given number of hours (0 = 80).
    #[arg(long, value_name = "HOURS")]
    hours: Option<u32>,

    /// Day-level trend over the given number of days (0 = 80).
    #[arg(long, value_name = "DAYS")]
    days: Option<u32>,

    /// Month-level trend over the given number of months (0 = 38).
    #[arg(long, value_name = "MONTHS")]
    months: Option<u32>,

    /// SQLite database file.
    #[arg(short, long, default_value = "./upsdata.sqlite3")]
    database: PathBuf,

    /// Directory the chart files are written to.
    #[arg(short, long, default_value = "./site/img")]
    output_dir: PathBuf,

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
        .add_directive(format!("upsplot={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let mut periods: Vec<Period> = Vec::new();
    if let Some(hours) = args.hours {
        periods.push(Period::Hours(hours));
    }
    if let Some(days) = args.days {
        periods.push(Period::Days(days));
    }
    if let Some(months) = args.months {
        periods.push(Period::Months(months));
    }
    if periods.is_empty() {
        error!("Nothing to do: pass --hours, --days and/or --months");
        return ExitCode::FAILURE;
    }

    let store = match SqliteStore::open(&args.database) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open database {}: {}", args.database.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&args.output_dir) {
        error!(
            "Failed to create output directory {}: {}",
            args.output_dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let mut failed = false;
    for period in periods {
        if let Err(e) = render_period(&store, period, &args.output_dir) {
            error!("{} trend failed: {}", period.tag(), e);
            failed = true;
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Renders every chart group for one period.
fn render_period(
    store: &SqliteStore,
    period: Period,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let period = period.normalized();
    let now_epoch = Utc::now().timestamp();
    let stamp = Local::now().format("%d-%m-%Y %H:%M");

    for group in &trend::GROUPS {
        let series = trend::fetch_group(store, group, period, now_epoch)?;
        if !series.has_data() {
            warn!(
                "No {} data in the past {} {}, skipping chart",
                group.column,
                period.count(),
                period.tag()
            );
            continue;
        }

        let path = render::chart_path(output_dir, period, group);
        let title = format!(
            "{} trend past {} {} ({})",
            group.column,
            period.count(),
            period.tag(),
            stamp
        );
        render::render_chart(&path, group, &series, &title)?;
        info!("Chart written: {}", path.display());
    }
    Ok(())
}
