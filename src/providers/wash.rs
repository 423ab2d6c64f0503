use crate::core::error::FetchError;
use crate::core::settings::HttpSettings;
use crate::providers::LocationApi;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

const LOCATIONS_PATH: &str = "/locations";
const MACHINE_STATUS_PATH: &str = "/get_machine_status_v1";

/// reqwest-backed client for the Wash Mobile Pay cloud functions.
#[derive(Clone)]
pub struct WashApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl WashApiClient {
    pub fn new(settings: &HttpSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: (&str, &str)) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[query])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %url, key = query.1, error = %e, "Request failed");
                FetchError::transient(e)
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }

        if !status.is_success() {
            tracing::warn!(url = %url, key = query.1, %status, "HTTP error");
            return Err(FetchError::Transient(format!("HTTP {status}")));
        }

        response.json::<Value>().await.map_err(|e| {
            tracing::warn!(url = %url, key = query.1, error = %e, "Invalid JSON payload");
            FetchError::transient(e)
        })
    }
}

#[async_trait]
impl LocationApi for WashApiClient {
    fn name(&self) -> &'static str {
        "Wash Mobile Pay"
    }

    async fn fetch_location(&self, code: &str) -> Result<Value, FetchError> {
        self.get_json(LOCATIONS_PATH, ("srcode", code)).await
    }

    async fn fetch_machine_status(&self, uln: &str) -> Result<Value, FetchError> {
        self.get_json(MACHINE_STATUS_PATH, ("uln", uln)).await
    }
}
