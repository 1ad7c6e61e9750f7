use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    error::StoreError,
    model::{CurrentObservation, ForecastObservation},
};

use super::{ObservationStore, StoreSession};

type CurrentKey = (String, NaiveDateTime);
type ForecastKey = (String, NaiveDateTime, DateTime<Utc>);

#[derive(Debug, Default)]
struct Tables {
    current: BTreeMap<CurrentKey, CurrentObservation>,
    forecast: BTreeMap<ForecastKey, ForecastObservation>,
}

impl Tables {
    fn upsert_current(&mut self, record: CurrentObservation) {
        let key = (record.city.clone(), record.as_of);
        match self.current.get_mut(&key) {
            Some(existing) => existing.fetched_at = record.fetched_at,
            None => {
                self.current.insert(key, record);
            }
        }
    }

    fn upsert_forecast(&mut self, record: ForecastObservation) {
        let key = (record.city.clone(), record.forecast_for, record.prediction_generated_at);
        match self.forecast.get_mut(&key) {
            Some(existing) => existing.fetched_at = record.fetched_at,
            None => {
                self.forecast.insert(key, record);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.current.is_empty() && self.forecast.is_empty()
    }
}

/// In-process store with the conflict rule and commit unit of
/// [`PgStore`](super::PgStore). Writes never fail here, so every write made
/// before a unit's commit is kept, as the savepoint-per-statement database
/// session does after a failed statement. Used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed current observations ordered by `(city, as_of)`.
    pub fn current_rows(&self) -> Vec<CurrentObservation> {
        self.tables().current.values().cloned().collect()
    }

    /// Committed forecast rows ordered by their natural key.
    pub fn forecast_rows(&self) -> Vec<ForecastObservation> {
        self.tables().forecast.values().cloned().collect()
    }

    /// Store a row as if an earlier run had committed it.
    pub fn seed_current(&self, record: CurrentObservation) {
        self.tables().upsert_current(record);
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn acquire(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        Ok(Box::new(MemorySession {
            committed: Arc::clone(&self.committed),
            pending: Tables::default(),
        }))
    }
}

/// Buffers writes until commit; reads see committed plus pending rows.
#[derive(Debug)]
struct MemorySession {
    committed: Arc<Mutex<Tables>>,
    pending: Tables,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn current_exists(&mut self, city: &str, as_of: NaiveDateTime) -> Result<bool, StoreError> {
        let key = (city.to_string(), as_of);
        if self.pending.current.contains_key(&key) {
            return Ok(true);
        }
        let committed = self.committed.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(committed.current.contains_key(&key))
    }

    async fn upsert_current(&mut self, record: &CurrentObservation) -> Result<(), StoreError> {
        self.pending.upsert_current(record.clone());
        Ok(())
    }

    async fn upsert_forecast(&mut self, record: &ForecastObservation) -> Result<(), StoreError> {
        self.pending.upsert_forecast(record.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let mut committed = self.committed.lock().unwrap_or_else(PoisonError::into_inner);
        for record in pending.current.into_values() {
            committed.upsert_current(record);
        }
        for record in pending.forecast.into_values() {
            committed.upsert_forecast(record);
        }
        Ok(())
    }
}
