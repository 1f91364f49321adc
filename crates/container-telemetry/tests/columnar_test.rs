// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    config_for, log_path, raw_record, MemoryIngestor, MemoryIngestorFactory, CONTAINER_ID,
};
use container_telemetry::backends::{ColumnarBackend, LogBackend};
use container_telemetry::config::{ColumnarSettings, EngineConfig, Route};
use container_telemetry::errors::{DeliveryError, IngestError};
use container_telemetry::records::EnrichedLogRecord;
use container_telemetry::{DeliveryEngine, DeliveryResult};
use tokio_util::sync::CancellationToken;
use url::Url;

fn columnar_config(resource_centric: bool) -> EngineConfig {
    let mut config = config_for("http://127.0.0.1:1/");
    config.resource_centric = resource_centric;
    config.route = Route::Columnar(ColumnarSettings {
        cluster_uri: Url::parse("https://mycluster.kusto.windows.net").expect("url"),
        client_id: "client".to_string(),
        tenant_id: "tenant".to_string(),
        client_secret: "secret".to_string(),
        database: "logs".to_string(),
    });
    config
}

#[tokio::test]
async fn test_rows_are_streamed_in_order() {
    let factory = Arc::new(MemoryIngestorFactory::new(MemoryIngestor::default()));
    let engine = DeliveryEngine::builder(columnar_config(true))
        .http_client(reqwest::Client::new())
        .ingestor_factory(factory.clone())
        .build()
        .expect("engine");

    let path = log_path("web-1", "default", "web");
    let batch: Vec<_> = (0..50)
        .map(|i| raw_record(&path, "stdout", &format!("line {i}")))
        .collect();
    assert_eq!(engine.deliver_logs(&batch).await, DeliveryResult::Accepted);
    assert_eq!(engine.deliver_logs(&batch[..1]).await, DeliveryResult::Accepted);

    // the ingestor is created once and reused
    assert_eq!(factory.created(), 1);

    let lines = factory.ingestor.lines.lock().expect("lock").clone();
    assert_eq!(lines.len(), 51);
    let rows: Vec<serde_json::Value> = lines
        .iter()
        .map(|l| serde_json::from_str(l).expect("json row"))
        .collect();
    for (i, row) in rows.iter().take(50).enumerate() {
        assert_eq!(row["LogMessage"], format!("line {i}"));
    }
    let first = &rows[0];
    assert_eq!(first["ContainerID"], CONTAINER_ID);
    assert_eq!(first["PodName"], "web-1");
    assert_eq!(first["PodNamespace"], "default");
    assert_eq!(first["ContainerName"], "web");
    assert_eq!(first["LogSource"], "stdout");
    assert_eq!(first["Computer"], "node-1");
    assert_eq!(
        first["AzureResourceId"],
        "/subscriptions/s/resourceGroups/rg/managedClusters/c1"
    );

    let properties = factory
        .ingestor
        .properties
        .lock()
        .expect("lock")
        .clone()
        .expect("properties");
    assert_eq!(properties.database, "logs");
    assert_eq!(properties.table, "ContainerLogV2");
    assert_eq!(properties.mapping, "ContainerLogv2Mapping");
    assert_eq!(engine.counters().snapshot().log_records_sent, 51);
}

#[tokio::test]
async fn test_resource_id_only_in_resource_centric_mode() {
    let factory = Arc::new(MemoryIngestorFactory::new(MemoryIngestor::default()));
    let engine = DeliveryEngine::builder(columnar_config(false))
        .http_client(reqwest::Client::new())
        .ingestor_factory(factory.clone())
        .build()
        .expect("engine");
    let record = raw_record(&log_path("web-1", "default", "web"), "stdout", "x");
    assert_eq!(engine.deliver_logs(&[record]).await, DeliveryResult::Accepted);

    let lines = factory.ingestor.lines.lock().expect("lock").clone();
    let row: serde_json::Value = serde_json::from_str(&lines[0]).expect("json row");
    assert_eq!(row["AzureResourceId"], "");
}

#[tokio::test]
async fn test_client_creation_failure_is_retried() {
    let factory = Arc::new(MemoryIngestorFactory::failing());
    let engine = DeliveryEngine::builder(columnar_config(true))
        .http_client(reqwest::Client::new())
        .ingestor_factory(factory.clone())
        .build()
        .expect("engine");
    let record = raw_record(&log_path("web-1", "default", "web"), "stdout", "x");

    assert_eq!(engine.deliver_logs(&[record.clone()]).await, DeliveryResult::Retry);
    assert_eq!(engine.deliver_logs(&[record]).await, DeliveryResult::Retry);
    // creation is attempted again on every batch
    assert_eq!(factory.created(), 2);
    let counters = engine.counters().snapshot();
    assert_eq!(counters.ingest_client_errors, 2);
    assert_eq!(counters.log_records_sent, 0);
}

#[tokio::test]
async fn test_slow_ingestion_times_out() {
    let factory = Arc::new(MemoryIngestorFactory::new(MemoryIngestor {
        delay: Some(Duration::from_secs(30)),
        ..MemoryIngestor::default()
    }));
    let backend = ColumnarBackend::new(factory, "logs", None, CancellationToken::new())
        .with_timeout(Duration::from_millis(50));
    let record = EnrichedLogRecord {
        log_entry: "slow".to_string(),
        ..EnrichedLogRecord::default()
    };

    let err = backend.send(&[record]).await.expect_err("timeout");
    assert!(matches!(err, DeliveryError::Ingest(IngestError::Timeout(_))));
}

#[tokio::test]
async fn test_cancelled_engine_aborts_ingestion() {
    let factory = Arc::new(MemoryIngestorFactory::new(MemoryIngestor {
        delay: Some(Duration::from_secs(30)),
        ..MemoryIngestor::default()
    }));
    let cancel = CancellationToken::new();
    let backend = ColumnarBackend::new(factory, "logs", None, cancel.clone());
    cancel.cancel();
    let record = EnrichedLogRecord {
        log_entry: "late".to_string(),
        ..EnrichedLogRecord::default()
    };

    let err = backend.send(&[record]).await.expect_err("cancelled");
    assert!(matches!(err, DeliveryError::Ingest(IngestError::Cancelled)));
}
