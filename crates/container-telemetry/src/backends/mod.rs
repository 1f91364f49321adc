// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log delivery backends. Exactly one is active per engine.

use async_trait::async_trait;

use crate::errors::DeliveryError;
use crate::records::EnrichedLogRecord;

pub mod columnar;
pub mod forward;
pub mod http;

pub use columnar::{
    ColumnarBackend, IngestReader, IngestionProperties, Ingestor, IngestorFactory,
    KustoIngestorFactory, KustoStreamingIngestor,
};
pub use forward::ForwardBackend;
pub use http::{HttpLogBackend, OdsClient};

#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Sends one batch, preserving record order where the wire format allows.
    /// Returns the number of records handed to the backend.
    async fn send(&self, records: &[EnrichedLogRecord]) -> Result<usize, DeliveryError>;
}
