// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Columnar bulk ingestion backend.
//!
//! Rows are JSON-line encoded by a producer task into an in-memory pipe while
//! the ingestion client consumes the read end, bounded by a per-attempt
//! timeout derived from the engine's cancellation token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use super::LogBackend;
use crate::config::ColumnarSettings;
use crate::constants::{COLUMNAR_MAPPING, COLUMNAR_TABLE, INGEST_TIMEOUT};
use crate::errors::{DeliveryError, IngestError};
use crate::records::{ColumnarRow, EnrichedLogRecord};

const PIPE_CAPACITY: usize = 64 * 1024;
const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(300);

pub type IngestReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionProperties {
    pub database: String,
    pub table: String,
    pub mapping: String,
    pub format: String,
}

impl IngestionProperties {
    #[must_use]
    pub fn container_logs(database: &str) -> Self {
        IngestionProperties {
            database: database.to_string(),
            table: COLUMNAR_TABLE.to_string(),
            mapping: COLUMNAR_MAPPING.to_string(),
            format: "json".to_string(),
        }
    }
}

/// Consumes a stream of JSON lines into a table.
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest(
        &self,
        reader: IngestReader,
        properties: &IngestionProperties,
    ) -> Result<(), IngestError>;
}

/// Creates ingestors on demand so a lost client can be rebuilt.
#[async_trait]
pub trait IngestorFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Ingestor>, IngestError>;
}

pub struct ColumnarBackend {
    factory: Arc<dyn IngestorFactory>,
    ingestor: Mutex<Option<Arc<dyn Ingestor>>>,
    properties: IngestionProperties,
    resource_id: Option<String>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ColumnarBackend {
    #[must_use]
    pub fn new(
        factory: Arc<dyn IngestorFactory>,
        database: &str,
        resource_id: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        ColumnarBackend {
            factory,
            ingestor: Mutex::new(None),
            properties: IngestionProperties::container_logs(database),
            resource_id,
            timeout: INGEST_TIMEOUT,
            cancel,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the cached ingestor, creating it when absent.
    pub async fn ingestor(&self) -> Result<Arc<dyn Ingestor>, DeliveryError> {
        let mut slot = self.ingestor.lock().await;
        if let Some(ingestor) = slot.as_ref() {
            return Ok(ingestor.clone());
        }
        debug!("INGEST | Ingestor does not exist, creating");
        match self.factory.create().await {
            Ok(ingestor) => {
                *slot = Some(ingestor.clone());
                Ok(ingestor)
            }
            Err(e) => {
                error!("INGEST | Unable to create ingestion client: {}", e);
                Err(DeliveryError::IngestorUnavailable(e.to_string()))
            }
        }
    }
}

async fn produce_json_lines<W>(mut writer: W, rows: Vec<ColumnarRow>)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    for row in rows {
        let mut line = match serde_json::to_vec(&row) {
            Ok(line) => line,
            Err(e) => {
                warn!("INGEST | Skipping row that failed to encode: {}", e);
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = writer.write_all(&line).await {
            debug!("INGEST | Pipe closed by consumer: {}", e);
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("INGEST | Failed to close pipe: {}", e);
    }
}

#[async_trait]
impl LogBackend for ColumnarBackend {
    fn name(&self) -> &'static str {
        "columnar"
    }

    async fn send(&self, records: &[EnrichedLogRecord]) -> Result<usize, DeliveryError> {
        if records.is_empty() {
            return Ok(0);
        }
        let rows: Vec<ColumnarRow> = records
            .iter()
            .map(|r| r.to_columnar_row(self.resource_id.as_deref()))
            .collect();
        let count = rows.len();

        let ingestor = self.ingestor().await?;

        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let producer = tokio::spawn(produce_json_lines(writer, rows));

        let start = Instant::now();
        let attempt = self.cancel.child_token();
        let result = tokio::select! {
            res = tokio::time::timeout(self.timeout, ingestor.ingest(Box::new(reader), &self.properties)) => {
                match res {
                    Ok(inner) => inner,
                    Err(_) => Err(IngestError::Timeout(self.timeout)),
                }
            }
            () = attempt.cancelled() => Err(IngestError::Cancelled),
        };
        producer.abort();

        match result {
            Ok(()) => {
                debug!(
                    "INGEST | Wrote {} container log records in {} ms",
                    count,
                    start.elapsed().as_millis()
                );
                Ok(count)
            }
            Err(e) => {
                error!("INGEST | Error when streaming to ingestion: {}", e);
                Err(DeliveryError::Ingest(e))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Streaming ingestion over the cluster's REST endpoint with a
/// client-credentials token.
pub struct KustoStreamingIngestor {
    client: reqwest::Client,
    cluster_uri: Url,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl KustoStreamingIngestor {
    #[must_use]
    pub fn new(client: reqwest::Client, settings: &ColumnarSettings) -> Self {
        KustoStreamingIngestor {
            client,
            cluster_uri: settings.cluster_uri.clone(),
            authority: DEFAULT_AUTHORITY.to_string(),
            tenant_id: settings.tenant_id.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            token: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_authority(mut self, authority: String) -> Self {
        self.authority = authority.trim_end_matches('/').to_string();
        self
    }

    fn cluster_base(&self) -> &str {
        self.cluster_uri.as_str().trim_end_matches('/')
    }

    async fn access_token(&self) -> Result<String, IngestError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id);
        let scope = format!("{}/.default", self.cluster_base());
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| IngestError::Token(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| IngestError::Token(e.to_string()))?;
        if !status.is_success() {
            return Err(IngestError::Token(format!("token endpoint returned {status}")));
        }
        let token: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| IngestError::Token(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl Ingestor for KustoStreamingIngestor {
    async fn ingest(
        &self,
        reader: IngestReader,
        properties: &IngestionProperties,
    ) -> Result<(), IngestError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/v1/rest/ingest/{}/{}",
            self.cluster_base(),
            properties.database,
            properties.table
        );
        let body = reqwest::Body::wrap_stream(ReaderStream::new(reader));
        let resp = self
            .client
            .post(&url)
            .query(&[
                ("streamFormat", properties.format.as_str()),
                ("mappingName", properties.mapping.as_str()),
            ])
            .bearer_auth(token)
            .body(body)
            .send()
            .await
            .map_err(|e| IngestError::Request {
                status: e.status(),
                message: e.to_string(),
            })?;
        let status = resp.status();
        let text = resp.bytes().await.unwrap_or_default();
        if status.is_success() {
            Ok(())
        } else {
            Err(IngestError::Request {
                status: Some(status),
                message: String::from_utf8_lossy(&text).into_owned(),
            })
        }
    }
}

/// Builds [`KustoStreamingIngestor`]s from the configured credentials.
pub struct KustoIngestorFactory {
    client: reqwest::Client,
    settings: ColumnarSettings,
}

impl KustoIngestorFactory {
    #[must_use]
    pub fn new(client: reqwest::Client, settings: ColumnarSettings) -> Self {
        KustoIngestorFactory { client, settings }
    }
}

#[async_trait]
impl IngestorFactory for KustoIngestorFactory {
    async fn create(&self) -> Result<Arc<dyn Ingestor>, IngestError> {
        Ok(Arc::new(KustoStreamingIngestor::new(
            self.client.clone(),
            &self.settings,
        )))
    }
}
