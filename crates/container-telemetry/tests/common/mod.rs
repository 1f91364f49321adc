// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the delivery integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use container_telemetry::backends::{IngestReader, IngestionProperties, Ingestor, IngestorFactory};
use container_telemetry::config::EngineConfig;
use container_telemetry::errors::IngestError;
use container_telemetry::orchestrator::{ContainerStatus, PodInfo};
use container_telemetry::records::RawLogRecord;
use container_telemetry::telemetry::TelemetrySink;
use tokio::io::AsyncReadExt;

pub const CONTAINER_ID: &str = "0123456789abcdef";

pub fn log_path(pod: &str, namespace: &str, container: &str) -> String {
    format!("/var/log/containers/{pod}_{namespace}_{container}-{CONTAINER_ID}.log")
}

pub fn raw_record(filepath: &str, stream: &str, log: &str) -> RawLogRecord {
    RawLogRecord {
        filepath: filepath.to_string(),
        stream: stream.to_string(),
        log: log.to_string(),
        time: "2024-01-01T00:00:00Z".to_string(),
    }
}

pub fn app_pod() -> PodInfo {
    PodInfo {
        uid: "pod-uid-1".to_string(),
        container_statuses: vec![ContainerStatus {
            name: "web".to_string(),
            image: "nginx:1.25".to_string(),
            container_id: format!("containerd://{CONTAINER_ID}"),
        }],
        init_container_statuses: Vec::new(),
    }
}

pub fn config_for(endpoint: &str) -> EngineConfig {
    EngineConfig {
        ods_endpoint: endpoint.to_string(),
        workspace_id: "ws-1".to_string(),
        resource_id: "/subscriptions/s/resourceGroups/rg/managedClusters/c1".to_string(),
        resource_name: "c1".to_string(),
        hostname: "node-1".to_string(),
        ..EngineConfig::default()
    }
}

/// Telemetry sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub exceptions: Mutex<Vec<String>>,
    pub events: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl TelemetrySink for RecordingSink {
    fn send_exception(&self, message: &str) {
        self.exceptions
            .lock()
            .expect("lock")
            .push(message.to_string());
    }

    fn send_event(&self, name: &str, dimensions: &BTreeMap<String, String>) {
        self.events
            .lock()
            .expect("lock")
            .push((name.to_string(), dimensions.clone()));
    }
}

/// Ingestor that reads the whole stream into memory.
#[derive(Default)]
pub struct MemoryIngestor {
    pub lines: Mutex<Vec<String>>,
    pub properties: Mutex<Option<IngestionProperties>>,
    pub delay: Option<Duration>,
}

#[async_trait]
impl Ingestor for MemoryIngestor {
    async fn ingest(
        &self,
        mut reader: IngestReader,
        properties: &IngestionProperties,
    ) -> Result<(), IngestError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut body = String::new();
        reader
            .read_to_string(&mut body)
            .await
            .map_err(|e| IngestError::Request {
                status: None,
                message: e.to_string(),
            })?;
        self.lines
            .lock()
            .expect("lock")
            .extend(body.lines().map(str::to_string));
        *self.properties.lock().expect("lock") = Some(properties.clone());
        Ok(())
    }
}

/// Factory handing out one shared ingestor, or failing when asked to.
pub struct MemoryIngestorFactory {
    pub ingestor: Arc<MemoryIngestor>,
    pub created: AtomicUsize,
    pub fail: bool,
}

impl MemoryIngestorFactory {
    pub fn new(ingestor: MemoryIngestor) -> Self {
        MemoryIngestorFactory {
            ingestor: Arc::new(ingestor),
            created: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        MemoryIngestorFactory {
            fail: true,
            ..MemoryIngestorFactory::new(MemoryIngestor::default())
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IngestorFactory for MemoryIngestorFactory {
    async fn create(&self) -> Result<Arc<dyn Ingestor>, IngestError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(IngestError::Token("invalid client secret".to_string()));
        }
        Ok(self.ingestor.clone())
    }
}
