use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::{
    clock::Clock,
    config::Settings,
    error::{CityError, EtlError, StoreError},
    mapper::RecordMapper,
    provider::{FetchMode, WeatherSource},
    reconcile::{GapReconciler, ReconcileSummary},
    store::{ObservationStore, StoreSession},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CityFailure {
    pub city: String,
    pub error: String,
}

/// Outcome of one cycle over every configured city.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub succeeded_cities: Vec<String>,
    pub failed_cities: Vec<CityFailure>,
    pub total_backfilled: u32,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed_cities.is_empty()
    }

    /// `"Prague: <error>; London: <error>"`, or `None` when nothing failed.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failed_cities.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .failed_cities
            .iter()
            .map(|f| format!("{}: {}", f.city, f.error))
            .collect();
        Some(parts.join("; "))
    }

    /// Fail the run if any city failed.
    pub fn into_result(self) -> Result<Self, EtlError> {
        match self.failure_summary() {
            Some(summary) => Err(EtlError::CitiesFailed(summary)),
            None => Ok(self),
        }
    }
}

/// Drives a cycle: live fetch, map and write, then reconcile, city by city.
#[derive(Debug)]
pub struct CityProcessor {
    cities: Vec<String>,
    source: Arc<dyn WeatherSource>,
    store: Arc<dyn ObservationStore>,
    clock: Arc<dyn Clock>,
    mapper: RecordMapper,
    reconciler: GapReconciler,
}

impl CityProcessor {
    pub fn new(
        settings: &Settings,
        source: Arc<dyn WeatherSource>,
        store: Arc<dyn ObservationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mapper = RecordMapper::new(settings.time);
        let reconciler = GapReconciler::new(Arc::clone(&source), mapper, settings.backfill);
        Self {
            cities: settings.cities.clone(),
            source,
            store,
            clock,
            mapper,
            reconciler,
        }
    }

    pub fn cities(&self) -> &[String] {
        &self.cities
    }

    /// Run one cycle.
    ///
    /// A city's failure is recorded in the report and processing moves on.
    /// Each city's writes are committed once its sequence ends, whether it
    /// finished or stopped at a failure. `Err` is returned only when the
    /// store session cannot be acquired at all.
    pub async fn run_cycle(&self) -> Result<RunReport, StoreError> {
        let generated_at = self.clock.now();
        let mut session = self.store.acquire().await?;
        let mut report = RunReport::default();

        for city in &self.cities {
            let mut summary = ReconcileSummary::default();
            let outcome = self
                .process_city(city, session.as_mut(), generated_at, &mut summary)
                .await;
            let committed = session.commit().await;

            report.total_backfilled += summary.backfilled;

            match (outcome, committed) {
                (Ok(()), Ok(())) => {
                    info!(
                        city = %city,
                        backfilled = summary.backfilled,
                        present = summary.present,
                        unfilled = summary.unfilled,
                        fetch_failed = summary.fetch_failed,
                        "Inserted weather and forecast data"
                    );
                    report.succeeded_cities.push(city.clone());
                }
                (Err(err), commit) => {
                    if let Err(commit_err) = commit {
                        warn!(city = %city, error = %commit_err, "Commit after failure also failed");
                    }
                    error!(city = %city, error = %err, "City processing failed");
                    report.failed_cities.push(CityFailure { city: city.clone(), error: err.to_string() });
                }
                (Ok(()), Err(err)) => {
                    let err = CityError::from(err);
                    error!(city = %city, error = %err, "Commit failed");
                    report.failed_cities.push(CityFailure { city: city.clone(), error: err.to_string() });
                }
            }
        }

        info!(
            total_backfilled = report.total_backfilled,
            succeeded = report.succeeded_cities.len(),
            failed = report.failed_cities.len(),
            "Cycle finished"
        );
        Ok(report)
    }

    #[instrument(skip(self, session, summary))]
    async fn process_city(
        &self,
        city: &str,
        session: &mut dyn StoreSession,
        generated_at: DateTime<Utc>,
        summary: &mut ReconcileSummary,
    ) -> Result<(), CityError> {
        info!("Fetching weather");
        let fetched_at = self.clock.now();
        let doc = self.source.fetch(city, FetchMode::Live).await?;

        let current = self.mapper.map_current(city, &doc, fetched_at)?;
        let forecasts = self.mapper.map_forecast_hours(city, &doc, generated_at, fetched_at)?;

        session.upsert_current(&current).await?;
        for row in &forecasts {
            session.upsert_forecast(row).await?;
        }

        self.reconciler.reconcile(city, fetched_at, session, summary).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::TimeReference,
        config::{DatabaseSettings, SourceSettings},
        error::SourceError,
        mapper::fixtures::{self, EPOCH},
        model::{CurrentObservation, ForecastObservation, WeatherDocument},
        provider::MockWeatherSource,
        reconcile::BackfillWindow,
        store::MemoryStore,
    };
    use async_trait::async_trait;
    use chrono::{NaiveDateTime, TimeDelta, TimeZone};
    use std::{sync::Mutex, time::Duration};

    /// Clock that returns the configured instant until moved.
    #[derive(Debug)]
    struct StepClock(Mutex<DateTime<Utc>>);

    impl StepClock {
        fn at(instant: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(instant)))
        }

        fn advance(&self, by: TimeDelta) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(EPOCH, 0).unwrap()
    }

    fn settings(cities: &[&str]) -> Settings {
        Settings {
            cities: cities.iter().map(|c| c.to_string()).collect(),
            time: TimeReference::default(),
            source: SourceSettings::new("KEY"),
            database: DatabaseSettings { url: "postgres://unused".into(), max_connections: 1 },
            backfill: BackfillWindow::default(),
            schedule_interval: Duration::from_secs(900),
        }
    }

    fn live_or_empty_history(mode: FetchMode) -> Result<WeatherDocument, SourceError> {
        match mode {
            FetchMode::Live => Ok(fixtures::live_document(EPOCH, &[EPOCH])),
            FetchMode::Historical { .. } => Ok(WeatherDocument::default()),
        }
    }

    #[tokio::test]
    async fn end_to_end_second_cycle_only_refreshes_current() {
        let store = MemoryStore::new();
        let clock = StepClock::at(start());
        let mut source = MockWeatherSource::new();
        source.expect_fetch().returning(|_, mode| live_or_empty_history(mode));

        let processor = CityProcessor::new(
            &settings(&["Prague"]),
            Arc::new(source),
            Arc::new(store.clone()),
            clock.clone(),
        );

        let report = processor.run_cycle().await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.succeeded_cities, vec!["Prague"]);

        let as_of = start().naive_utc();
        let current = store.current_rows();
        assert_eq!(current.len(), 1);
        assert_eq!((current[0].city.as_str(), current[0].as_of), ("Prague", as_of));

        let forecast = store.forecast_rows();
        assert_eq!(forecast.len(), 1);
        assert_eq!(forecast[0].forecast_for, as_of);
        assert_eq!(forecast[0].prediction_generated_at, start());

        clock.advance(TimeDelta::minutes(9));
        processor.run_cycle().await.unwrap().into_result().unwrap();

        let current_after = store.current_rows();
        assert_eq!(current_after.len(), 1);
        assert_eq!(current_after[0].fields, current[0].fields);
        assert_eq!(current_after[0].fetched_at, start() + TimeDelta::minutes(9));

        // each run keeps its own prediction
        let forecast_after = store.forecast_rows();
        assert_eq!(forecast_after.len(), 2);
        assert!(
            forecast_after
                .iter()
                .any(|f| f.prediction_generated_at == start() + TimeDelta::minutes(9))
        );
    }

    #[tokio::test]
    async fn failing_city_does_not_stop_the_next() {
        let store = MemoryStore::new();
        let mut source = MockWeatherSource::new();
        source.expect_fetch().returning(|city, mode| {
            if city == "Atlantis" {
                Err(SourceError::Unavailable("HTTP 400 Bad Request".into()))
            } else {
                live_or_empty_history(mode)
            }
        });

        let processor = CityProcessor::new(
            &settings(&["Atlantis", "London"]),
            Arc::new(source),
            Arc::new(store.clone()),
            StepClock::at(start()),
        );

        let report = processor.run_cycle().await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.succeeded_cities, vec!["London"]);
        assert_eq!(report.failed_cities.len(), 1);
        assert_eq!(report.failed_cities[0].city, "Atlantis");

        let rows = store.current_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].city, "London");

        let err = report.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Atlantis"));
        assert!(msg.contains("HTTP 400"));
    }

    #[tokio::test]
    async fn every_failing_city_is_named() {
        let mut source = MockWeatherSource::new();
        source.expect_fetch().returning(|city, _| {
            if city == "Prague" {
                Err(SourceError::Timeout(30))
            } else {
                Ok(WeatherDocument::default())
            }
        });

        let processor = CityProcessor::new(
            &settings(&["Prague", "London"]),
            Arc::new(source),
            Arc::new(MemoryStore::new()),
            StepClock::at(start()),
        );

        let report = processor.run_cycle().await.unwrap();
        assert!(report.succeeded_cities.is_empty());
        let summary = report.failure_summary().unwrap();
        assert!(summary.contains("Prague: weather source timed out"));
        assert!(summary.contains("London: document has no `current` object"));
    }

    #[tokio::test]
    async fn backfill_runs_after_live_write() {
        let store = MemoryStore::new();
        let mut source = MockWeatherSource::new();
        source.expect_fetch().returning(|_, mode| match mode {
            FetchMode::Live => Ok(fixtures::live_document(EPOCH, &[])),
            FetchMode::Historical { date, hour } => {
                let top = date.and_hms_opt(hour, 0, 0).unwrap().and_utc().timestamp();
                Ok(fixtures::history_document(&[top]))
            }
        });

        let processor = CityProcessor::new(
            &settings(&["Prague"]),
            Arc::new(source),
            Arc::new(store.clone()),
            StepClock::at(start()),
        );

        let report = processor.run_cycle().await.unwrap();
        assert_eq!(report.total_backfilled, 6);
        // live 08:00 row plus 02:00..=07:00
        assert_eq!(store.current_rows().len(), 7);
    }

    /// Store that rejects forecast writes for one city.
    #[derive(Debug, Clone)]
    struct BrokenStore {
        inner: MemoryStore,
        fail_city: &'static str,
    }

    struct BrokenSession {
        inner: Box<dyn StoreSession>,
        fail_city: &'static str,
    }

    #[async_trait]
    impl ObservationStore for BrokenStore {
        async fn acquire(&self) -> Result<Box<dyn StoreSession>, StoreError> {
            Ok(Box::new(BrokenSession { inner: self.inner.acquire().await?, fail_city: self.fail_city }))
        }
    }

    #[async_trait]
    impl StoreSession for BrokenSession {
        async fn current_exists(&mut self, city: &str, as_of: NaiveDateTime) -> Result<bool, StoreError> {
            self.inner.current_exists(city, as_of).await
        }

        async fn upsert_current(&mut self, record: &CurrentObservation) -> Result<(), StoreError> {
            self.inner.upsert_current(record).await
        }

        async fn upsert_forecast(&mut self, record: &ForecastObservation) -> Result<(), StoreError> {
            if record.city == self.fail_city {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.upsert_forecast(record).await
        }

        async fn commit(&mut self) -> Result<(), StoreError> {
            self.inner.commit().await
        }
    }

    #[tokio::test]
    async fn partial_writes_before_store_failure_are_committed() {
        let memory = MemoryStore::new();
        let store = BrokenStore { inner: memory.clone(), fail_city: "Prague" };
        let mut source = MockWeatherSource::new();
        source.expect_fetch().returning(|_, mode| live_or_empty_history(mode));

        let processor = CityProcessor::new(
            &settings(&["Prague", "London"]),
            Arc::new(source),
            Arc::new(store),
            StepClock::at(start()),
        );

        let report = processor.run_cycle().await.unwrap();
        assert_eq!(report.succeeded_cities, vec!["London"]);
        assert_eq!(report.failed_cities[0].city, "Prague");
        assert!(report.failed_cities[0].error.contains("database error"));

        // Prague's current row was written before the failing forecast write
        let cities: Vec<String> = memory.current_rows().into_iter().map(|r| r.city).collect();
        assert_eq!(cities, vec!["London", "Prague"]);
        assert_eq!(memory.forecast_rows().len(), 1);
    }
}
