//! CheckWX METAR endpoint

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::MetarApi;
use crate::error::ApiError;

const SERVICE: &str = "CheckWX";

#[derive(Debug, Deserialize)]
struct MetarResponse {
    #[serde(default)]
    data: Vec<String>,
}

/// CheckWX REST client
#[derive(Debug, Clone)]
pub struct CheckWxClient {
    client: reqwest::Client,
    base_url: String,
    key: String,
}

impl CheckWxClient {
    pub fn new(client: reqwest::Client, base_url: &str, key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl MetarApi for CheckWxClient {
    async fn lookup_current_weather(&self, icao: &str) -> Result<Option<Vec<String>>, ApiError> {
        info!("Looking up current weather for {}", icao);

        let response = self
            .client
            .get(format!("{}/metar/{}", self.base_url, icao))
            .header("X-API-Key", &self.key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                service: SERVICE,
                status: status.as_u16(),
            });
        }

        let body: MetarResponse = response.json().await?;
        Ok((!body.data.is_empty()).then_some(body.data))
    }
}
