//! Backfill of missing current observations from historical data.
//!
//! Every cycle probes a fixed look-back window for slots without a current
//! observation and tries to fill each one from the history endpoint. History
//! is hourly, so of every four quarter-hour slots only the top-of-hour one
//! can ever be filled; the other three stay gaps and are skipped quietly.
//! Nothing is recorded for an unfilled slot, so it is simply probed again on
//! the next cycle.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Timelike, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    error::{ConfigError, StoreError},
    mapper::RecordMapper,
    provider::{FetchMode, WeatherSource},
    store::StoreSession,
};

/// Look-back window and slot spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillWindow {
    lookback_minutes: u32,
    step_minutes: u32,
}

impl Default for BackfillWindow {
    fn default() -> Self {
        Self {
            lookback_minutes: Self::DEFAULT_LOOKBACK_HOURS * 60,
            step_minutes: Self::DEFAULT_STEP_MINUTES,
        }
    }
}

impl BackfillWindow {
    pub const DEFAULT_LOOKBACK_HOURS: u32 = 6;
    pub const DEFAULT_STEP_MINUTES: u32 = 15;

    pub fn new(lookback_hours: u32, step_minutes: u32) -> Result<Self, ConfigError> {
        if step_minutes == 0 {
            return Err(ConfigError::Invalid {
                field: "backfill.step_minutes",
                reason: "must be greater than zero".into(),
            });
        }
        let lookback_minutes = lookback_hours.checked_mul(60).ok_or(ConfigError::Invalid {
            field: "backfill.lookback_hours",
            reason: "too large".into(),
        })?;
        if lookback_minutes % step_minutes != 0 {
            return Err(ConfigError::Invalid {
                field: "backfill.step_minutes",
                reason: format!("must divide the look-back of {lookback_minutes} minutes"),
            });
        }
        Ok(Self { lookback_minutes, step_minutes })
    }

    pub fn slot_count(&self) -> u32 {
        self.lookback_minutes / self.step_minutes
    }

    /// Slots from one step before `now` back to the full look-back, most
    /// recent first. `now` is truncated to the minute.
    pub fn slots(&self, now: NaiveDateTime) -> Vec<NaiveDateTime> {
        let anchor = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);

        (1..=self.slot_count())
            .map(|k| anchor - TimeDelta::minutes(i64::from(k) * i64::from(self.step_minutes)))
            .collect()
    }
}

/// Counters for one city's reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub probed: u32,
    pub present: u32,
    pub backfilled: u32,
    pub unfilled: u32,
    pub fetch_failed: u32,
}

#[derive(Debug, Clone)]
pub struct GapReconciler {
    source: Arc<dyn WeatherSource>,
    mapper: RecordMapper,
    window: BackfillWindow,
}

impl GapReconciler {
    pub fn new(source: Arc<dyn WeatherSource>, mapper: RecordMapper, window: BackfillWindow) -> Self {
        Self { source, mapper, window }
    }

    /// Probe every slot of the window ending at `now` for `city` and fill
    /// what history allows.
    ///
    /// Counters are accumulated into `summary` as slots are processed, so a
    /// store failure part-way still reports the slots already written. Fetch
    /// failures only skip their slot; store failures abort the pass.
    pub async fn reconcile(
        &self,
        city: &str,
        now: DateTime<Utc>,
        session: &mut dyn StoreSession,
        summary: &mut ReconcileSummary,
    ) -> Result<(), StoreError> {
        let civil_now = self.mapper.time().civil_minute(now);

        for slot in self.window.slots(civil_now) {
            summary.probed += 1;

            if session.current_exists(city, slot).await? {
                summary.present += 1;
                continue;
            }

            let doc = match self.source.fetch(city, FetchMode::historical(slot)).await {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(city, %slot, error = %err, "History fetch failed, slot left for next cycle");
                    summary.fetch_failed += 1;
                    continue;
                }
            };

            match self.mapper.find_hour(&doc, slot) {
                Some(hour) => {
                    let record = self.mapper.map_backfill(city, slot, hour, now);
                    session.upsert_current(&record).await?;
                    summary.backfilled += 1;
                    info!(city, %slot, "Backfilled missing record");
                }
                None => {
                    debug!(city, %slot, "No historical entry for slot");
                    summary.unfilled += 1;
                }
            }
        }

        Ok(())
    }
}
