use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::fmt::{self, Debug};

use crate::{error::SourceError, model::WeatherDocument};

pub mod weatherapi;

pub use weatherapi::WeatherApiSource;

/// What to fetch for a city.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Current conditions plus the hourly forecast.
    Live,
    /// One hour of past data for a calendar date, in civil time.
    Historical { date: NaiveDate, hour: u32 },
}

impl FetchMode {
    /// Historical request covering the hour that contains `at`.
    pub fn historical(at: NaiveDateTime) -> Self {
        FetchMode::Historical { date: at.date(), hour: at.hour() }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Live => "live",
            FetchMode::Historical { .. } => "history",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Live => f.write_str("live"),
            FetchMode::Historical { date, hour } => write!(f, "history {date} {hour:02}:00"),
        }
    }
}

/// A source of weather documents. Implementations perform a single attempt;
/// retrying is left to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    async fn fetch(&self, city: &str, mode: FetchMode) -> Result<WeatherDocument, SourceError>;
}
