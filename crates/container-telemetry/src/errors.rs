// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Fatal startup errors; the host terminates instead of degrading silently.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing configuration: {0}")]
    Missing(&'static str),
}

/// Why a batch could not be handed to a backend.
///
/// Every variant except [`DeliveryError::Payload`] is transient and turns into
/// a retry signal for the caller.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The batch could not be serialized; retrying would not help.
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    /// Transport failure or non-200 answer from the batch HTTP endpoint.
    #[error("Request {request_id} failed with status {status:?}: {message}")]
    Http {
        request_id: String,
        status: Option<StatusCode>,
        message: String,
    },

    #[error("Unable to connect to forward socket: {0}")]
    SocketConnect(#[source] std::io::Error),

    #[error("Failed to write to forward socket: {0}")]
    SocketWrite(#[source] std::io::Error),

    #[error("Ingestion client unavailable: {0}")]
    IngestorUnavailable(String),

    #[error("Ingestion failed: {0}")]
    Ingest(#[from] IngestError),
}

impl DeliveryError {
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            DeliveryError::Http {
                status: Some(StatusCode::TOO_MANY_REQUESTS),
                ..
            }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Ingestion timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Ingestion cancelled")]
    Cancelled,

    #[error("Failed to acquire token: {0}")]
    Token(String),

    #[error("Ingestion request failed with status {status:?}: {message}")]
    Request {
        status: Option<StatusCode>,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("Timestamp {0} is out of range")]
    Timestamp(u64),

    #[error("Failed to serialize tags: {0}")]
    Tags(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Failed to encode forward frame: {0}")]
    Write(String),

    #[error("Value too large for frame: {0} bytes")]
    TooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum PodListError {
    #[error("Orchestrator client not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to list pods: {0}")]
    Request(String),

    #[error("Failed to decode pod list: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine already started")]
    AlreadyStarted,

    #[error("Engine not running")]
    NotRunning,
}
