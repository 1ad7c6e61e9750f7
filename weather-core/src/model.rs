use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition triple reported alongside every observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub text: String,
    pub icon: String,
    pub code: i32,
}

/// Observed weather values shared by current and hourly entries.
///
/// Every numeric field is optional: stations legitimately omit values (a
/// missing UV sensor, no gust reading) and an absent value is stored as NULL,
/// never as a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherFields {
    pub temp_c: Option<f64>,
    pub temp_f: Option<f64>,
    pub is_day: Option<i32>,
    pub condition: Condition,
    pub wind_mph: Option<f64>,
    pub wind_kph: Option<f64>,
    pub wind_degree: Option<i32>,
    pub wind_dir: Option<String>,
    pub pressure_mb: Option<f64>,
    pub pressure_in: Option<f64>,
    pub precip_mm: Option<f64>,
    pub precip_in: Option<f64>,
    pub humidity: Option<i32>,
    pub cloud: Option<i32>,
    pub feelslike_c: Option<f64>,
    pub feelslike_f: Option<f64>,
    pub windchill_c: Option<f64>,
    pub windchill_f: Option<f64>,
    pub heatindex_c: Option<f64>,
    pub heatindex_f: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub dewpoint_f: Option<f64>,
    pub vis_km: Option<f64>,
    pub vis_miles: Option<f64>,
    pub gust_mph: Option<f64>,
    pub gust_kph: Option<f64>,
    pub uv: Option<f64>,
}

/// `current` block of a live document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub last_updated_epoch: i64,
    #[serde(flatten)]
    pub fields: WeatherFields,
}

/// One entry of `forecast.forecastday[].hour[]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourConditions {
    pub time_epoch: i64,
    #[serde(flatten)]
    pub fields: WeatherFields,
    pub will_it_rain: Option<i32>,
    pub chance_of_rain: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForecastDay {
    #[serde(default)]
    pub hour: Vec<HourConditions>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Forecast {
    #[serde(default)]
    pub forecastday: Vec<ForecastDay>,
}

/// Document returned by the weather source for either fetch mode.
///
/// Live documents carry both blocks; historical documents usually only
/// carry `forecast` with the requested hour.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherDocument {
    pub current: Option<CurrentConditions>,
    pub forecast: Option<Forecast>,
}

impl WeatherDocument {
    /// All hourly entries across every forecast day, in document order.
    pub fn hours(&self) -> impl Iterator<Item = &HourConditions> {
        self.forecast
            .iter()
            .flat_map(|f| f.forecastday.iter())
            .flat_map(|d| d.hour.iter())
    }
}

/// Row of `weather_current`, keyed by `(city, as_of)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentObservation {
    pub city: String,
    pub as_of: NaiveDateTime,
    pub fields: WeatherFields,
    pub fetched_at: DateTime<Utc>,
}

/// Row of `weather_forecast`, keyed by
/// `(city, forecast_for, prediction_generated_at)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastObservation {
    pub city: String,
    pub forecast_for: NaiveDateTime,
    pub fields: WeatherFields,
    pub will_it_rain: Option<i32>,
    pub chance_of_rain: Option<i32>,
    pub prediction_generated_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}
