use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::{config::SourceSettings, error::SourceError, model::WeatherDocument};

use super::{FetchMode, WeatherSource};

/// Client for WeatherAPI.com `forecast.json` and `history.json`.
#[derive(Debug, Clone)]
pub struct WeatherApiSource {
    settings: SourceSettings,
    http: Client,
}

impl WeatherApiSource {
    pub fn new(settings: SourceSettings) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { settings, http })
    }

    fn endpoint(&self, mode: FetchMode) -> String {
        let name = match mode {
            FetchMode::Live => "forecast.json",
            FetchMode::Historical { .. } => "history.json",
        };
        format!("{}/{}", self.settings.base_url, name)
    }

    fn query(&self, city: &str, mode: FetchMode) -> Vec<(&'static str, String)> {
        let mut params = vec![("key", self.settings.api_key.clone()), ("q", city.to_string())];
        match mode {
            FetchMode::Live => {
                params.push(("days", self.settings.forecast_days.to_string()));
                params.push(("aqi", "no".to_string()));
                params.push(("alerts", "no".to_string()));
            }
            FetchMode::Historical { date, hour } => {
                params.push(("dt", date.format("%Y-%m-%d").to_string()));
                params.push(("hour", hour.to_string()));
            }
        }
        params
    }

    fn transport_error(&self, err: reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout(self.settings.timeout.as_secs())
        } else {
            SourceError::Unavailable(err.to_string())
        }
    }

    fn parse(body: &str, mode: FetchMode) -> Result<WeatherDocument, SourceError> {
        let doc: WeatherDocument = serde_json::from_str(body)
            .map_err(|e| SourceError::Malformed(format!("{mode} response: {e}")))?;

        // A history response without hours is an expected "no data yet",
        // a live response without either block is not.
        if mode == FetchMode::Live {
            if doc.current.is_none() {
                return Err(SourceError::Malformed("live response has no `current` object".into()));
            }
            if doc.forecast.is_none() {
                return Err(SourceError::Malformed("live response has no `forecast` object".into()));
            }
        }

        Ok(doc)
    }
}

#[async_trait]
impl WeatherSource for WeatherApiSource {
    #[instrument(skip(self, mode), fields(mode = %mode))]
    async fn fetch(&self, city: &str, mode: FetchMode) -> Result<WeatherDocument, SourceError> {
        let url = self.endpoint(mode);
        debug!(url = %url, "Requesting WeatherAPI.com");

        let res = self
            .http
            .get(&url)
            .query(&self.query(city, mode))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(SourceError::Unavailable(format!(
                "WeatherAPI {} request failed with status {}: {}",
                mode.as_str(),
                status,
                truncate_body(&body),
            )));
        }

        Self::parse(&body, mode)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
