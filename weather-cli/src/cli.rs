use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inquire::{Password, Text};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use weather_etl_core::{
    CityProcessor, Config, MemoryStore, ObservationStore, PgStore, Settings, SystemClock,
    WeatherApiSource,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-etl", version, about = "Weather ETL: ingest, backfill and store observations")]
pub struct Cli {
    /// Path to the config file; defaults to the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively write the config file.
    Configure,

    /// Run a single cycle over every configured city.
    Run {
        /// Keep writes in memory instead of the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Repeat the cycle on a fixed interval until interrupted.
    Watch {
        /// Overrides `schedule.interval_minutes`.
        #[arg(long)]
        interval_minutes: Option<u64>,
    },

    /// Create the reporting schema and tables.
    InitSchema,

    /// Verify the database is reachable.
    CheckDb,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let path = self.config.as_deref();

        match self.command {
            Command::Configure => configure(path),
            Command::Run { dry_run } => {
                let settings = load_settings(path)?;
                if dry_run {
                    let store = MemoryStore::new();
                    run_once(&settings, Arc::new(store.clone())).await?;
                    info!(
                        current_rows = store.current_rows().len(),
                        forecast_rows = store.forecast_rows().len(),
                        "Dry run finished, nothing was written to the database"
                    );
                    Ok(())
                } else {
                    let store = PgStore::connect(&settings.database).await?;
                    let outcome = run_once(&settings, Arc::new(store.clone())).await;
                    store.close().await;
                    outcome
                }
            }
            Command::Watch { interval_minutes } => {
                let mut settings = load_settings(path)?;
                if let Some(minutes) = interval_minutes {
                    anyhow::ensure!(minutes > 0, "--interval-minutes must be greater than zero");
                    settings.schedule_interval = Duration::from_secs(minutes * 60);
                }
                let store = PgStore::connect(&settings.database).await?;
                let outcome = watch(&settings, Arc::new(store.clone())).await;
                store.close().await;
                outcome
            }
            Command::InitSchema => {
                let settings = load_settings(path)?;
                let store = PgStore::connect(&settings.database).await?;
                store.bootstrap_schema().await?;
                store.close().await;
                println!("Schema is ready");
                Ok(())
            }
            Command::CheckDb => {
                let settings = load_settings(path)?;
                let store = PgStore::connect(&settings.database).await?;
                store.check_connection().await?;
                store.close().await;
                println!("Database connection OK");
                Ok(())
            }
        }
    }
}

/// File, then environment, then validation.
fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut config = Config::load(path)?;
    config.apply_process_env();
    let settings = config.validate().context("Configuration is incomplete")?;
    Ok(settings)
}

fn processor(settings: &Settings, store: Arc<dyn ObservationStore>) -> Result<CityProcessor> {
    let source = WeatherApiSource::new(settings.source.clone())?;
    Ok(CityProcessor::new(settings, Arc::new(source), store, Arc::new(SystemClock)))
}

async fn run_once(settings: &Settings, store: Arc<dyn ObservationStore>) -> Result<()> {
    let report = processor(settings, store)?.run_cycle().await?;
    let report = report.into_result()?;
    println!(
        "Processed {} cities, backfilled {} observations",
        report.succeeded_cities.len(),
        report.total_backfilled
    );
    Ok(())
}

async fn watch(settings: &Settings, store: Arc<dyn ObservationStore>) -> Result<()> {
    let processor = processor(settings, store)?;
    let mut interval = tokio::time::interval(settings.schedule_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_secs = settings.schedule_interval.as_secs(),
        cities = ?processor.cities(),
        "Watching, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match processor.run_cycle().await {
                    Ok(report) => {
                        if let Some(failures) = report.failure_summary() {
                            warn!(%failures, "Cycle finished with failures");
                        }
                    }
                    Err(e) => error!(error = %e, "Cycle could not start"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
                return Ok(());
            }
        }
    }
}

fn configure(path: Option<&Path>) -> Result<()> {
    let mut config = Config::load(path)?;

    let api_key = Password::new("WeatherAPI key:")
        .without_confirmation()
        .with_help_message("Stored in the config file; WEATHER_API_KEY overrides it")
        .prompt()?;
    if !api_key.trim().is_empty() {
        config.api_key = Some(api_key.trim().to_string());
    }

    let current_cities = config.cities.join(", ");
    let cities = Text::new("Cities (comma separated):")
        .with_default(if current_cities.is_empty() { "Prague, London" } else { &current_cities })
        .prompt()?;
    config.cities = cities
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    let timezone = Text::new("Timezone for observation times (IANA name):")
        .with_default(config.timezone.as_deref().unwrap_or("UTC"))
        .prompt()?;
    config.timezone = Some(timezone.trim().to_string());

    let url = Text::new("PostgreSQL connection URL:")
        .with_default(config.database.url.as_deref().unwrap_or("postgres://localhost/weather"))
        .prompt()?;
    config.database.url = Some(url.trim().to_string());

    if let Err(e) = config.validate() {
        warn!(error = %e, "Saved configuration is not complete yet");
    }

    let saved = config.save(path)?;
    println!("Configuration saved to {}", saved.display());
    Ok(())
}
