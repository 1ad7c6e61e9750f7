//! Time sources and the civil time reference used for every timestamp the
//! pipeline derives.

use std::fmt::Debug;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{ConfigError, MapError};

/// Source of "now".
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Converts instants into the civil (wall-clock) timestamps stored in the
/// `as_of` / `forecast_for` columns.
///
/// Stored timestamps carry no offset, so the zone used here decides what
/// they mean. It is configured explicitly rather than taken from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReference {
    tz: Tz,
}

impl Default for TimeReference {
    fn default() -> Self {
        Self { tz: Tz::UTC }
    }
}

impl TimeReference {
    /// Parse an IANA zone name such as `Europe/Prague`.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        let tz = name.trim().parse::<Tz>().map_err(|e| ConfigError::Invalid {
            field: "timezone",
            reason: e.to_string(),
        })?;
        Ok(Self { tz })
    }

    /// Civil timestamp for Unix epoch seconds.
    pub fn from_epoch(&self, epoch: i64) -> Result<NaiveDateTime, MapError> {
        DateTime::from_timestamp(epoch, 0)
            .map(|utc| self.civil(utc))
            .ok_or(MapError::InvalidEpoch(epoch))
    }

    pub fn civil(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.tz).naive_local()
    }

    /// Civil "now", truncated to the whole minute.
    pub fn civil_minute(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        let civil = self.civil(instant);
        civil
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(civil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 12)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn utc_reference_is_identity() {
        let time = TimeReference::default();
        assert_eq!(time.from_epoch(1_720_771_200).unwrap(), at(8, 0, 0));
    }

    #[test]
    fn named_zone_shifts_civil_time() {
        let time = TimeReference::parse("Europe/Prague").unwrap();
        // CEST, UTC+2
        assert_eq!(time.from_epoch(1_720_771_200).unwrap(), at(10, 0, 0));
    }

    #[test]
    fn unknown_zone_is_invalid_config() {
        let err = TimeReference::parse("Mars/Olympus").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "timezone", .. }));
    }

    #[test]
    fn out_of_range_epoch_is_rejected() {
        let time = TimeReference::default();
        assert_eq!(time.from_epoch(i64::MAX), Err(MapError::InvalidEpoch(i64::MAX)));
    }

    #[test]
    fn civil_minute_drops_seconds_and_fraction() {
        let time = TimeReference::default();
        let instant = DateTime::from_timestamp(1_720_771_200 + 9 * 60 + 41, 123_000_000).unwrap();
        assert_eq!(time.civil_minute(instant), at(8, 9, 0));
    }
}
