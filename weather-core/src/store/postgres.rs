use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{
    Connection, PgConnection, PgPool, Postgres, Transaction,
    postgres::{PgArguments, PgPoolOptions},
    query::Query,
};
use tracing::{debug, info, instrument};

use crate::{
    config::DatabaseSettings,
    error::StoreError,
    model::{CurrentObservation, ForecastObservation, WeatherFields},
};

use super::{ObservationStore, StoreSession};

const EXISTS_CURRENT: &str =
    "SELECT EXISTS (SELECT 1 FROM reporting_data.weather_current WHERE city = $1 AND as_of = $2)";

const UPSERT_CURRENT: &str = r"
    INSERT INTO reporting_data.weather_current (
        city, as_of, temp_c, temp_f, is_day,
        condition_text, condition_icon, condition_code,
        wind_mph, wind_kph, wind_degree, wind_dir,
        pressure_mb, pressure_in, precip_mm, precip_in,
        humidity, cloud, feelslike_c, feelslike_f,
        windchill_c, windchill_f, heatindex_c, heatindex_f,
        dewpoint_c, dewpoint_f, vis_km, vis_miles,
        gust_mph, gust_kph, uv, fetched_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
        $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32
    )
    ON CONFLICT (city, as_of) DO UPDATE SET fetched_at = EXCLUDED.fetched_at
";

const UPSERT_FORECAST: &str = r"
    INSERT INTO reporting_data.weather_forecast (
        city, forecast_for, temp_c, temp_f, is_day,
        condition_text, condition_icon, condition_code,
        wind_mph, wind_kph, wind_degree, wind_dir,
        pressure_mb, pressure_in, precip_mm, precip_in,
        humidity, cloud, feelslike_c, feelslike_f,
        windchill_c, windchill_f, heatindex_c, heatindex_f,
        dewpoint_c, dewpoint_f, vis_km, vis_miles,
        gust_mph, gust_kph, uv,
        will_it_rain, chance_of_rain, prediction_generated_at, fetched_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
        $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31,
        $32, $33, $34, $35
    )
    ON CONFLICT (city, forecast_for, prediction_generated_at)
    DO UPDATE SET fetched_at = EXCLUDED.fetched_at
";

/// PostgreSQL store over the `reporting_data` schema.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[instrument(skip_all, fields(max_connections = settings.max_connections))]
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await?;

        info!("Database pool created");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn check_connection(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        debug!("Database connection verified");
        Ok(())
    }

    /// Create the schema and both tables if they do not exist yet.
    #[instrument(skip(self))]
    pub async fn bootstrap_schema(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Schema and tables created or already exist");
        Ok(())
    }

    /// Release every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ObservationStore for PgStore {
    async fn acquire(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        Ok(Box::new(PgSession { pool: self.pool.clone(), tx: None }))
    }
}

/// Transaction-backed session. The transaction is opened lazily on first use
/// and rolled back if the session is dropped uncommitted.
///
/// Every statement runs inside its own savepoint. A failed statement would
/// otherwise abort the whole transaction and turn the next `COMMIT` into a
/// rollback of everything written before it.
#[derive(Debug)]
struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    async fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        Ok(&mut **self.tx.insert(tx))
    }
}

fn bind_fields<'q>(
    query: Query<'q, Postgres, PgArguments>,
    f: &'q WeatherFields,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(f.temp_c)
        .bind(f.temp_f)
        .bind(f.is_day)
        .bind(&f.condition.text)
        .bind(&f.condition.icon)
        .bind(f.condition.code)
        .bind(f.wind_mph)
        .bind(f.wind_kph)
        .bind(f.wind_degree)
        .bind(&f.wind_dir)
        .bind(f.pressure_mb)
        .bind(f.pressure_in)
        .bind(f.precip_mm)
        .bind(f.precip_in)
        .bind(f.humidity)
        .bind(f.cloud)
        .bind(f.feelslike_c)
        .bind(f.feelslike_f)
        .bind(f.windchill_c)
        .bind(f.windchill_f)
        .bind(f.heatindex_c)
        .bind(f.heatindex_f)
        .bind(f.dewpoint_c)
        .bind(f.dewpoint_f)
        .bind(f.vis_km)
        .bind(f.vis_miles)
        .bind(f.gust_mph)
        .bind(f.gust_kph)
        .bind(f.uv)
}

#[async_trait]
impl StoreSession for PgSession {
    async fn current_exists(&mut self, city: &str, as_of: NaiveDateTime) -> Result<bool, StoreError> {
        let mut savepoint = self.conn().await?.begin().await?;
        let exists: bool = sqlx::query_scalar(EXISTS_CURRENT)
            .bind(city)
            .bind(as_of)
            .fetch_one(&mut *savepoint)
            .await?;
        savepoint.commit().await?;
        Ok(exists)
    }

    async fn upsert_current(&mut self, record: &CurrentObservation) -> Result<(), StoreError> {
        let mut savepoint = self.conn().await?.begin().await?;
        let query = sqlx::query(UPSERT_CURRENT).bind(&record.city).bind(record.as_of);
        bind_fields(query, &record.fields)
            .bind(record.fetched_at)
            .execute(&mut *savepoint)
            .await?;
        savepoint.commit().await?;
        Ok(())
    }

    async fn upsert_forecast(&mut self, record: &ForecastObservation) -> Result<(), StoreError> {
        let mut savepoint = self.conn().await?.begin().await?;
        let query = sqlx::query(UPSERT_FORECAST).bind(&record.city).bind(record.forecast_for);
        bind_fields(query, &record.fields)
            .bind(record.will_it_rain)
            .bind(record.chance_of_rain)
            .bind(record.prediction_generated_at)
            .bind(record.fetched_at)
            .execute(&mut *savepoint)
            .await?;
        savepoint.commit().await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }
}
