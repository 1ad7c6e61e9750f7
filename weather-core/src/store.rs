//! Persistence of observations.
//!
//! Both tables follow a write-once-per-key, refresh-stamp-on-replay rule:
//! the first write for a natural key stores the observed values, every later
//! write for the same key only moves `fetched_at`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::fmt::Debug;

use crate::{
    error::StoreError,
    model::{CurrentObservation, ForecastObservation},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Hands out the session a run works in.
#[async_trait]
pub trait ObservationStore: Send + Sync + Debug {
    /// Acquire the session for one run. Dropping the session releases it and
    /// discards anything written since the last [`StoreSession::commit`].
    async fn acquire(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// A scoped unit of work against the store.
#[async_trait]
pub trait StoreSession: Send {
    /// Whether a current observation exists at exactly `(city, as_of)`.
    async fn current_exists(&mut self, city: &str, as_of: NaiveDateTime) -> Result<bool, StoreError>;

    async fn upsert_current(&mut self, record: &CurrentObservation) -> Result<(), StoreError>;

    async fn upsert_forecast(&mut self, record: &ForecastObservation) -> Result<(), StoreError>;

    /// Make everything written so far durable and start a new unit.
    async fn commit(&mut self) -> Result<(), StoreError>;
}
