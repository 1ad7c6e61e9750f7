use thiserror::Error;

/// Failures of the weather source client. No retries happen at this layer.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure or a non-success HTTP status.
    #[error("weather source unavailable: {0}")]
    Unavailable(String),

    /// The bounded wait for a response was exceeded.
    #[error("weather source timed out after {0}s")]
    Timeout(u64),

    /// The response body does not have the expected top-level shape.
    #[error("malformed weather document: {0}")]
    Malformed(String),
}

/// Failures while projecting a document onto the record shapes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("document has no `current` object")]
    MissingCurrent,

    #[error("document has no `forecast` object")]
    MissingForecast,

    #[error("epoch value {0} is out of range")]
    InvalidEpoch(i64),
}

/// Failures of the persistent store. Key collisions are not errors: they are
/// resolved by the upsert itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Startup-fatal configuration problems.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid configuration for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Anything that aborts the processing of a single city for a cycle.
#[derive(Debug, Error)]
pub enum CityError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// At least one city failed; the message names every failing city.
    #[error("errors occurred for cities: {0}")]
    CitiesFailed(String),
}
