// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch HTTP endpoint: one JSON document per batch.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use super::LogBackend;
use crate::config::EngineConfig;
use crate::constants::{
    CONTAINER_LOG_DATA_TYPE, IP_NAME, REQUEST_ID_HEADER, RESOURCE_ID_HEADER,
    TOPOLOGY_API_VERSION,
};
use crate::errors::{ConfigError, DeliveryError};
use crate::records::{Blob, DataItem, EnrichedLogRecord};

/// Extra headers a blob kind needs on top of the base set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobHeaders {
    /// Container logs and agent events.
    Plain,
    /// Metric points carry the request date.
    Dated,
    /// Topology uploads go to the versioned endpoint as a workspace-scoped type.
    Topology,
}

/// Client for the batch ingestion endpoint, shared by every HTTP path.
#[derive(Debug, Clone)]
pub struct OdsClient {
    client: reqwest::Client,
    endpoint: String,
    workspace_id: String,
    headers: HeaderMap,
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value)
        .map_err(|e| ConfigError::Invalid(format!("{what} is not a valid header value: {e}")))
}

impl OdsClient {
    pub fn new(client: reqwest::Client, config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, header_value(&config.user_agent(), "user agent")?);
        if config.resource_centric {
            headers.insert(
                HeaderName::from_static(RESOURCE_ID_HEADER),
                header_value(&config.resource_id, RESOURCE_ID_HEADER)?,
            );
        }
        Ok(OdsClient {
            client,
            endpoint: config.ods_endpoint.clone(),
            workspace_id: config.workspace_id.clone(),
            headers,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts `{DataType, IPName, DataItems}` and succeeds only on a 200.
    pub async fn post_blob<T: Serialize + Sync>(
        &self,
        data_type: &str,
        ip_name: &str,
        items: &[T],
        kind: BlobHeaders,
    ) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&Blob {
            data_type,
            ip_name,
            data_items: items,
        })
        .map_err(|e| DeliveryError::Payload(format!("Error while marshalling {data_type}: {e}")))?;

        let request_id = Uuid::new_v4().to_string();
        let mut headers = self.headers.clone();
        if let Ok(id) = HeaderValue::from_str(&request_id) {
            headers.insert(REQUEST_ID_HEADER, id);
        }

        let url = match kind {
            BlobHeaders::Topology => {
                format!("{}?api-version={}", self.endpoint, TOPOLOGY_API_VERSION)
            }
            BlobHeaders::Plain | BlobHeaders::Dated => self.endpoint.clone(),
        };
        if matches!(kind, BlobHeaders::Dated | BlobHeaders::Topology) {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            if let Ok(date) = HeaderValue::from_str(&now) {
                headers.insert("x-ms-date", date);
            }
        }
        if kind == BlobHeaders::Topology {
            if let Ok(workspace) = HeaderValue::from_str(&self.workspace_id) {
                headers.insert("ocp-workspace-id", workspace);
            }
            headers.insert("ocp-is-dynamic-data-type", HeaderValue::from_static("False"));
            headers.insert("ocp-intelligence-pack-name", HeaderValue::from_static("Azure"));
            headers.insert(
                "x-ms-serviceidentity",
                HeaderValue::from_static("ApplicationInsights"),
            );
        }

        let start = Instant::now();
        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await;
        let elapsed = start.elapsed();

        match resp {
            Ok(resp) => {
                let status = resp.status();
                // drain so the connection returns to the pool
                let body = resp.bytes().await.unwrap_or_default();
                if status == StatusCode::OK {
                    debug!(
                        "HTTP | Posted {} {} items in {} ms, request id {}",
                        items.len(),
                        data_type,
                        elapsed.as_millis(),
                        request_id
                    );
                    Ok(())
                } else {
                    error!(
                        "HTTP | RequestId {} Status Code {} for {} after {} ms",
                        request_id,
                        status,
                        data_type,
                        elapsed.as_millis()
                    );
                    Err(DeliveryError::Http {
                        request_id,
                        status: Some(status),
                        message: String::from_utf8_lossy(&body).into_owned(),
                    })
                }
            }
            Err(e) => {
                error!(
                    "HTTP | Error when sending request {} for {} after {} ms: {}",
                    request_id,
                    data_type,
                    elapsed.as_millis(),
                    e
                );
                Err(DeliveryError::Http {
                    request_id,
                    status: e.status(),
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Container logs as `CONTAINER_LOG_BLOB` documents.
#[derive(Debug, Clone)]
pub struct HttpLogBackend {
    ods: OdsClient,
}

impl HttpLogBackend {
    #[must_use]
    pub fn new(ods: OdsClient) -> Self {
        HttpLogBackend { ods }
    }
}

#[async_trait]
impl LogBackend for HttpLogBackend {
    fn name(&self) -> &'static str {
        "batch-http"
    }

    async fn send(&self, records: &[EnrichedLogRecord]) -> Result<usize, DeliveryError> {
        if records.is_empty() {
            return Ok(0);
        }
        let items: Vec<DataItem> = records.iter().map(EnrichedLogRecord::to_data_item).collect();
        self.ods
            .post_blob(CONTAINER_LOG_DATA_TYPE, IP_NAME, &items, BlobHeaders::Plain)
            .await?;
        Ok(items.len())
    }
}
