//! Core library for the `weather-etl` pipeline.
//!
//! This crate defines:
//! - Configuration loading, environment overrides and validation
//! - The WeatherAPI source client behind the [`WeatherSource`] trait
//! - Mapping of weather documents onto observation records
//! - The observation store (PostgreSQL and in-memory)
//! - Gap reconciliation and the per-city cycle driver
//!
//! It is used by `weather-etl`, but can also be reused by other binaries or services.

pub mod clock;
pub mod config;
pub mod error;
pub mod mapper;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod reconcile;
pub mod store;

pub use clock::{Clock, SystemClock, TimeReference};
pub use config::{Config, Settings, SourceSettings};
pub use error::{CityError, ConfigError, EtlError, MapError, SourceError, StoreError};
pub use mapper::RecordMapper;
pub use model::{CurrentObservation, ForecastObservation, WeatherDocument};
pub use orchestrator::{CityFailure, CityProcessor, RunReport};
pub use provider::{FetchMode, WeatherApiSource, WeatherSource};
pub use reconcile::{BackfillWindow, GapReconciler, ReconcileSummary};
pub use store::{MemoryStore, ObservationStore, PgStore, StoreSession};
