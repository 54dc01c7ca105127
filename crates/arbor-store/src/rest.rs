//! PostgREST client for the remote store.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use arbor_core::defaults;
use arbor_core::{Error, JsonMap, NaturalKey, RemoteRecord, RemoteStore, Result};

use crate::config::StoreConfig;

/// SQLSTATE of a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl PostgrestError {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn describe(&self, raw: &str) -> String {
        match (&self.message, &self.details) {
            (Some(m), Some(d)) => format!("{} ({})", m, d),
            (Some(m), None) => m.clone(),
            _ if raw.trim().is_empty() => "empty response body".to_string(),
            _ => raw.trim().to_string(),
        }
    }
}

/// Whether a request may be replayed after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Reads and id-addressed patches: retry on any transient failure.
    Idempotent,
    /// Inserts: retry only if the connection was never established.
    ConnectOnly,
}

/// Remote store reached over the PostgREST HTTP surface.
pub struct RestStore {
    client: Client,
    config: StoreConfig,
}

impl RestStore {
    /// Create a new client with the given configuration.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            timeout_secs = config.timeout_secs,
            max_retries = config.max_retries,
            "Initializing REST store client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(StoreConfig::from_env()?)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}{}/{}",
            self.config.base_url.trim_end_matches('/'),
            defaults::REST_PATH,
            table
        )
    }

    /// Build a request with authentication headers.
    fn build_request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
    }

    /// Send a request, retrying transient failures according to `replay`.
    async fn send_with_retry<F>(&self, replay: Replay, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            let can_retry = attempt < self.config.max_retries;
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    let transient = status == StatusCode::TOO_MANY_REQUESTS
                        || status.is_server_error();
                    if transient && replay == Replay::Idempotent && can_retry {
                        warn!(%status, attempt, "Transient store response, retrying");
                    } else {
                        return Ok(response);
                    }
                }
                Err(e) => {
                    let retryable = match replay {
                        Replay::Idempotent => e.is_connect() || e.is_timeout(),
                        Replay::ConnectOnly => e.is_connect(),
                    };
                    if !(retryable && can_retry) {
                        return Err(Error::Transport(format!("Request failed: {}", e)));
                    }
                    warn!(error = %e, attempt, "Store request failed, retrying");
                }
            }
            tokio::time::sleep(self.config.backoff(attempt)).await;
            attempt += 1;
        }
    }

    /// Read a body that may be empty into its rows.
    async fn read_rows(response: Response) -> Result<Vec<RemoteRecord>> {
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<JsonValue>(&body)? {
            JsonValue::Array(rows) => rows.into_iter().map(RemoteRecord::from_json).collect(),
            single @ JsonValue::Object(_) => Ok(vec![RemoteRecord::from_json(single)?]),
            other => Err(Error::Serialization(format!(
                "unexpected store response: {}",
                other
            ))),
        }
    }

    /// Map a non-success response to an error.
    async fn error_from(table: &str, response: Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = PostgrestError::parse(&body);
        let message = parsed.describe(&body);

        if status == StatusCode::CONFLICT {
            match parsed.code.as_deref() {
                None | Some(UNIQUE_VIOLATION) => {
                    return Error::Conflict {
                        table: table.to_string(),
                        message,
                    };
                }
                // Foreign key and other integrity violations.
                Some(code) => {
                    return Error::InvalidInput(format!(
                        "{} rejected the write [{}]: {}",
                        table, code, message
                    ));
                }
            }
        }

        Error::Transport(format!(
            "{} returned HTTP {}{}: {}",
            table,
            status.as_u16(),
            parsed
                .code
                .as_deref()
                .map(|c| format!(" [{}]", c))
                .unwrap_or_default(),
            message
        ))
    }

    fn eq_filters(key: &NaturalKey) -> Vec<(String, String)> {
        key.columns()
            .map(|(column, value)| (column.to_string(), format!("eq.{}", value)))
            .collect()
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    #[instrument(skip(self, record), fields(db_table = table))]
    async fn create(&self, table: &str, record: &JsonMap) -> Result<RemoteRecord> {
        let response = self
            .send_with_retry(Replay::ConnectOnly, || {
                self.build_request(Method::POST, table)
                    .header("Prefer", "return=representation")
                    .json(record)
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(table, response).await);
        }

        let row = Self::read_rows(response).await?.into_iter().next().ok_or_else(|| {
            Error::Serialization(format!("create on {} returned no row", table))
        })?;
        debug!(record_id = %row.id, "Created store row");
        Ok(row)
    }

    #[instrument(skip(self), fields(db_table = table, natural_key = %key))]
    async fn find_by_natural_key(
        &self,
        table: &str,
        key: &NaturalKey,
    ) -> Result<Option<RemoteRecord>> {
        if key.is_empty() {
            return Err(Error::InvalidInput(format!(
                "lookup on {} without key columns",
                table
            )));
        }
        let filters = Self::eq_filters(key);

        let response = self
            .send_with_retry(Replay::Idempotent, || {
                self.build_request(Method::GET, table)
                    .query(&filters)
                    .query(&[("select", "*"), ("limit", "1")])
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(table, response).await);
        }

        Ok(Self::read_rows(response).await?.into_iter().next())
    }

    #[instrument(skip(self, partial), fields(db_table = table, record_id = id))]
    async fn patch(
        &self,
        table: &str,
        id: &str,
        partial: &JsonMap,
    ) -> Result<Option<RemoteRecord>> {
        let id_filter = format!("eq.{}", id);

        let response = self
            .send_with_retry(Replay::Idempotent, || {
                self.build_request(Method::PATCH, table)
                    .header("Prefer", "return=representation")
                    .query(&[("id", id_filter.as_str())])
                    .json(partial)
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(table, response).await);
        }
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        Ok(Self::read_rows(response).await?.into_iter().next())
    }

    #[instrument(skip(self), fields(db_table = table, natural_key = %parent))]
    async fn list_by_parent(&self, table: &str, parent: &NaturalKey) -> Result<Vec<RemoteRecord>> {
        let filters = Self::eq_filters(parent);
        let page_size = self.config.page_size;
        let mut rows = Vec::new();

        loop {
            let offset = rows.len().to_string();
            let limit = page_size.to_string();
            let response = self
                .send_with_retry(Replay::Idempotent, || {
                    self.build_request(Method::GET, table)
                        .query(&filters)
                        .query(&[
                            ("select", "*"),
                            ("order", "id.asc"),
                            ("limit", limit.as_str()),
                            ("offset", offset.as_str()),
                        ])
                })
                .await?;

            if !response.status().is_success() {
                return Err(Self::error_from(table, response).await);
            }

            let page = Self::read_rows(response).await?;
            let short_page = page.len() < page_size;
            rows.extend(page);
            if short_page {
                break;
            }
        }

        debug!(record_count = rows.len(), "Listed store rows");
        Ok(rows)
    }
}
