//! Projection of weather documents onto the stored record shapes.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{
    clock::TimeReference,
    error::MapError,
    model::{CurrentObservation, ForecastObservation, HourConditions, WeatherDocument},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordMapper {
    time: TimeReference,
}

impl RecordMapper {
    pub fn new(time: TimeReference) -> Self {
        Self { time }
    }

    pub fn time(&self) -> &TimeReference {
        &self.time
    }

    /// Current observation keyed by the document's `last_updated_epoch`.
    pub fn map_current(
        &self,
        city: &str,
        doc: &WeatherDocument,
        fetched_at: DateTime<Utc>,
    ) -> Result<CurrentObservation, MapError> {
        let current = doc.current.as_ref().ok_or(MapError::MissingCurrent)?;

        Ok(CurrentObservation {
            city: city.to_string(),
            as_of: self.time.from_epoch(current.last_updated_epoch)?,
            fields: current.fields.clone(),
            fetched_at,
        })
    }

    /// One forecast row per hourly entry, all stamped with `generated_at`.
    pub fn map_forecast_hours(
        &self,
        city: &str,
        doc: &WeatherDocument,
        generated_at: DateTime<Utc>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<ForecastObservation>, MapError> {
        if doc.forecast.is_none() {
            return Err(MapError::MissingForecast);
        }

        doc.hours()
            .map(|hour| {
                Ok(ForecastObservation {
                    city: city.to_string(),
                    forecast_for: self.time.from_epoch(hour.time_epoch)?,
                    fields: hour.fields.clone(),
                    will_it_rain: hour.will_it_rain,
                    chance_of_rain: hour.chance_of_rain,
                    prediction_generated_at: generated_at,
                    fetched_at,
                })
            })
            .collect()
    }

    /// Historical entry whose timestamp equals `slot` exactly, if any.
    ///
    /// History is served at hourly granularity, so only a top-of-hour slot
    /// can ever match; entries with unrepresentable epochs never match.
    pub fn find_hour<'a>(
        &self,
        doc: &'a WeatherDocument,
        slot: NaiveDateTime,
    ) -> Option<&'a HourConditions> {
        doc.hours()
            .find(|hour| self.time.from_epoch(hour.time_epoch).is_ok_and(|t| t == slot))
    }

    /// Current observation reconstructed from a historical hourly entry.
    pub fn map_backfill(
        &self,
        city: &str,
        slot: NaiveDateTime,
        hour: &HourConditions,
        fetched_at: DateTime<Utc>,
    ) -> CurrentObservation {
        CurrentObservation {
            city: city.to_string(),
            as_of: slot,
            fields: hour.fields.clone(),
            fetched_at,
        }
    }
}
