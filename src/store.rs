//! Analytical data store
//!
//! The engine only needs "run this SQL, give me rows" plus the endpoint export
//! links point at. `CartoClient` speaks the CARTO SQL API over HTTP.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};

/// One result row, keyed by column name
pub type Row = Map<String, Value>;

#[async_trait]
pub trait SqlStore: Send + Sync {
    /// Execute a rendered query and return its rows
    async fn execute(&self, sql: &str) -> EngineResult<Vec<Row>>;

    /// Query endpoint used for download links
    fn download_endpoint(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct SqlResponse {
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    error: Option<Vec<String>>,
}

/// CARTO SQL API client
#[derive(Clone)]
pub struct CartoClient {
    client: reqwest::Client,
    query_url: String,
    download_url: String,
    api_key: Option<String>,
}

impl CartoClient {
    pub fn new(
        query_url: &str,
        download_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Store(e.to_string()))?;

        Ok(Self {
            client,
            query_url: query_url.to_string(),
            download_url: download_url.to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &Config) -> EngineResult<Self> {
        Self::new(
            &config.store_url,
            &config.download_url,
            config.store_api_key.clone(),
            config.upstream_timeout,
        )
    }
}

#[async_trait]
impl SqlStore for CartoClient {
    async fn execute(&self, sql: &str) -> EngineResult<Vec<Row>> {
        let mut form = vec![("q", sql)];
        if let Some(key) = self.api_key.as_deref() {
            form.push(("api_key", key));
        }

        // POST keeps large geometries out of the URL
        let resp = self
            .client
            .post(&self.query_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Store request failed: {}", e);
                EngineError::Store(e.to_string())
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?;
        let parsed = serde_json::from_str::<SqlResponse>(&text);

        if !status.is_success() {
            let message = match parsed {
                Ok(SqlResponse { error: Some(errors), .. }) => errors.join("; "),
                _ => text,
            };
            tracing::warn!("Store returned HTTP {}: {}", status.as_u16(), message);
            return Err(EngineError::Store(format!("HTTP {}: {}", status.as_u16(), message)));
        }

        let body = parsed.map_err(|e| EngineError::Store(format!("Malformed response: {}", e)))?;
        if let Some(errors) = body.error {
            return Err(EngineError::Store(errors.join("; ")));
        }
        Ok(body.rows)
    }

    fn download_endpoint(&self) -> &str {
        &self.download_url
    }
}

/// Numeric column; the store sometimes returns numerics as strings
pub fn row_f64(row: &Row, column: &str) -> Option<f64> {
    match row.get(column)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Text column (dates arrive as strings)
pub fn row_string(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
