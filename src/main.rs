use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ramadan_goals::{
    api::AlAdhanClient,
    config::AppConfig,
    dates::{day_of_window, format_local_date},
    resolver::{RamadanWindowService, ResolveStatus, ResolverSnapshot},
    store::FileStore,
    traits::{Clock, SystemClock},
    window::SourceMode,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "ramadan-goals")]
#[command(about = "Ramadan goal tracker - season window resolution")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the current Ramadan window and show the resolver state
    Status,
    /// Force a fresh resolution, bypassing the cached record
    Retry,
    /// Switch the sourcing strategy (global, location or manual)
    SetMode {
        mode: SourceMode,
    },
    /// Store a city/country pair for location-based resolution
    SetLocation {
        city: String,
        country: String,
    },
    /// Enter the Ramadan window by hand (YYYY-MM-DD dates)
    SetManual {
        start: String,
        end: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
        .parse_lossy("ramadan_goals=info");

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(run(args, config))
}

async fn run(args: Args, config: AppConfig) -> Result<()> {
    let api = AlAdhanClient::new(config.aladhan.base_url.clone(), &config.network)?;
    let store = FileStore::from_config(&config.storage);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = RamadanWindowService::new(api, store, clock.clone(), &config);

    match args.command.unwrap_or(Command::Status) {
        Command::Status => {
            service.load().await;
        }
        Command::Retry => {
            service.load().await;
            service.retry_resolve().await;
        }
        Command::SetMode { mode } => {
            service.load().await;
            service.set_source_mode(mode).await;
        }
        Command::SetLocation { city, country } => {
            service.load().await;
            service.update_location(&city, &country).await;
        }
        Command::SetManual { start, end } => {
            service.load().await;
            if let Err(e) = service.save_manual_window(&start, &end).await {
                println!("Manual window rejected: {e}");
            }
        }
    }

    print_snapshot(&service.snapshot(), clock.as_ref());
    Ok(())
}

fn print_snapshot(snapshot: &ResolverSnapshot, clock: &dyn Clock) {
    println!("status:      {}", snapshot.status);
    println!("source mode: {}", snapshot.source_mode);
    println!(
        "window:      {} .. {} (season {})",
        format_local_date(snapshot.window.start),
        format_local_date(snapshot.window.end),
        snapshot.window.season_year
    );

    if snapshot.status == ResolveStatus::Ready {
        match day_of_window(clock.today(), &snapshot.window) {
            Some(day) => println!("today:       Ramadan day {day}"),
            None => println!("today:       outside the Ramadan window"),
        }
    }

    if !snapshot.error.is_empty() {
        println!("note:        {}", snapshot.error);
    }
}
