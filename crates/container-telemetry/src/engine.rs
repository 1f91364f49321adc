// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The delivery engine: one owned service instance holding the cache, the
//! error tables, the counters and the active log backend.
//!
//! Delivery entry points take `&self` and are safe to call concurrently from
//! any number of host worker tasks. Shared state is only touched in short
//! critical sections, never across a network call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backends::http::BlobHeaders;
use crate::backends::{
    ColumnarBackend, ForwardBackend, HttpLogBackend, IngestorFactory, KustoIngestorFactory,
    LogBackend, OdsClient,
};
use crate::config::{EngineConfig, Route};
use crate::constants::{
    APP_DEPENDENCIES_DATA_TYPE, APP_REQUESTS_DATA_TYPE, INSIGHTS_METRICS_DATA_TYPE, IP_NAME,
    KUBE_MON_AGENT_EVENTS_FLUSHED_EVENT, KUBE_MON_AGENT_EVENT_DATA_TYPE, TOPOLOGY_IP_NAME,
};
use crate::counters::{DeliveryCounters, LogBatchStats};
use crate::error_events::{ErrorEventAggregator, ErrorEventKind};
use crate::errors::{ConfigError, DeliveryError, EngineError, PodListError};
use crate::http::get_client;
use crate::metadata_cache::MetadataCache;
use crate::orchestrator::{KubeApiPodLister, PodLister};
use crate::records::{ContainerPathInfo, EnrichedLogRecord, MetricSample, RawLogRecord};
use crate::telemetry::{LogTelemetrySink, TelemetrySink};
use crate::translator::{Translation, Translator};
use crate::DeliveryResult;

const STDOUT: &str = "stdout";
const STDERR: &str = "stderr";

pub struct DeliveryEngineBuilder {
    config: EngineConfig,
    pod_lister: Option<Arc<dyn PodLister>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    ingestor_factory: Option<Arc<dyn IngestorFactory>>,
    http_client: Option<reqwest::Client>,
}

impl DeliveryEngineBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        DeliveryEngineBuilder {
            config,
            pod_lister: None,
            telemetry: None,
            ingestor_factory: None,
            http_client: None,
        }
    }

    /// Orchestrator client for the metadata cache. When absent and the cache
    /// loop is enabled, the in-cluster service account is used.
    #[must_use]
    pub fn pod_lister(mut self, lister: Arc<dyn PodLister>) -> Self {
        self.pod_lister = Some(lister);
        self
    }

    #[must_use]
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    #[must_use]
    pub fn ingestor_factory(mut self, factory: Arc<dyn IngestorFactory>) -> Self {
        self.ingestor_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn build(self) -> Result<DeliveryEngine, ConfigError> {
        let config = self.config;
        config.validate()?;

        let telemetry: Arc<dyn TelemetrySink> = self
            .telemetry
            .unwrap_or_else(|| Arc::new(LogTelemetrySink));
        let client = self
            .http_client
            .unwrap_or_else(|| get_client(config.proxy_https.as_deref()));
        let ods = OdsClient::new(client.clone(), &config)?;
        let cancel = CancellationToken::new();

        let mut forward = None;
        let backend: Arc<dyn LogBackend> = match &config.route {
            Route::BatchHttp => Arc::new(HttpLogBackend::new(ods.clone())),
            Route::StreamingSocket { path } => {
                let backend = Arc::new(ForwardBackend::new(path.clone()));
                forward = Some(backend.clone());
                backend
            }
            Route::Columnar(settings) => {
                let factory = self.ingestor_factory.unwrap_or_else(|| {
                    Arc::new(KustoIngestorFactory::new(client.clone(), settings.clone()))
                });
                let resource_id = config
                    .resource_centric
                    .then(|| config.resource_id.clone());
                Arc::new(ColumnarBackend::new(
                    factory,
                    &settings.database,
                    resource_id,
                    cancel.clone(),
                ))
            }
        };
        info!("Container logs will be delivered via {}", backend.name());

        let lister = match self.pod_lister {
            Some(lister) => Some(lister),
            None if config.runs_cache_refresh() => match KubeApiPodLister::in_cluster() {
                Ok(lister) => Some(Arc::new(lister) as Arc<dyn PodLister>),
                Err(e) => {
                    let message = format!("Error getting config. Exception: {e}");
                    error!("CACHE | {}", message);
                    telemetry.send_exception(&message);
                    None
                }
            },
            None => None,
        };

        let translator = Translator::new(
            config.cluster_id().to_string(),
            config.cluster_name().to_string(),
            config.hostname.clone(),
            config.allow_partial_topology,
        );
        let events = ErrorEventAggregator::new(
            config.hostname.clone(),
            config.cluster_id().to_string(),
            config.cluster_name().to_string(),
        );
        let cache = Arc::new(MetadataCache::new(lister, config.hostname.clone()));

        Ok(DeliveryEngine {
            inner: Arc::new(EngineInner {
                config,
                cache,
                events,
                counters: DeliveryCounters::default(),
                translator,
                backend,
                forward,
                ods,
                telemetry,
            }),
            cancel,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

struct EngineInner {
    config: EngineConfig,
    cache: Arc<MetadataCache>,
    events: ErrorEventAggregator,
    counters: DeliveryCounters,
    translator: Translator,
    backend: Arc<dyn LogBackend>,
    forward: Option<Arc<ForwardBackend>>,
    ods: OdsClient,
    telemetry: Arc<dyn TelemetrySink>,
}

pub struct DeliveryEngine {
    inner: Arc<EngineInner>,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeliveryEngine {
    #[must_use]
    pub fn builder(config: EngineConfig) -> DeliveryEngineBuilder {
        DeliveryEngineBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn counters(&self) -> &DeliveryCounters {
        &self.inner.counters
    }

    #[must_use]
    pub fn cache(&self) -> &MetadataCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn error_events(&self) -> &ErrorEventAggregator {
        &self.inner.events
    }

    /// Opens the streaming socket if that route is active and spawns the
    /// background loops this process is responsible for.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        if let Some(forward) = &self.inner.forward {
            forward.warm_up().await;
        }

        let mut handles = Vec::new();
        if self.inner.config.runs_cache_refresh() {
            handles.push(tokio::spawn(self.inner.cache.clone().run_refresh_loop(
                self.inner.config.cache_refresh_interval,
                self.cancel.clone(),
            )));
        }
        if self.inner.config.collector_role {
            handles.push(tokio::spawn(
                self.inner.clone().run_error_flush_loop(self.cancel.clone()),
            ));
        }
        info!(
            "Delivery engine started with {} background task(s)",
            handles.len()
        );
        lock_tasks(&self.tasks).extend(handles);
        Ok(())
    }

    /// Cancels the background loops and waits for them to finish.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        if !self.started.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
            return Err(EngineError::NotRunning);
        }
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = lock_tasks(&self.tasks).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Background task ended abnormally: {}", e);
            }
        }
        info!("Delivery engine stopped");
        Ok(())
    }

    /// Runs one metadata cache refresh.
    pub async fn refresh_metadata_cache(&self) -> Result<usize, PodListError> {
        self.inner.cache.refresh().await
    }

    /// Runs one error-event flush.
    pub async fn flush_error_events(&self) -> DeliveryResult {
        self.inner.flush_error_events().await
    }

    pub fn record_error_event(&self, kind: ErrorEventKind, record: &RawLogRecord) {
        self.inner.events.record(kind, record);
    }

    pub fn record_error_line(&self, record: &RawLogRecord) {
        self.inner.events.record_line(record);
    }

    /// Records every line of an error-channel batch. Always accepted.
    pub fn deliver_error_lines(&self, records: &[RawLogRecord]) -> DeliveryResult {
        for record in records {
            self.inner.events.record_line(record);
        }
        DeliveryResult::Accepted
    }

    pub async fn deliver_logs(&self, records: &[RawLogRecord]) -> DeliveryResult {
        self.inner.deliver_logs(records).await
    }

    pub async fn deliver_metrics(&self, samples: &[MetricSample]) -> DeliveryResult {
        self.inner.deliver_metrics(samples).await
    }
}

fn lock_tasks(tasks: &Mutex<Vec<JoinHandle<()>>>) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
    match tasks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl EngineInner {
    fn is_excluded(&self, stream: &str, path: &ContainerPathInfo) -> bool {
        let excluded = if stream.eq_ignore_ascii_case(STDOUT) {
            &self.config.stdout_excluded_namespaces
        } else if stream.eq_ignore_ascii_case(STDERR) {
            &self.config.stderr_excluded_namespaces
        } else {
            return false;
        };
        path.container_id.is_empty() || excluded.contains(&path.namespace)
    }

    async fn deliver_logs(&self, records: &[RawLogRecord]) -> DeliveryResult {
        let start = Instant::now();
        let batch_time = Utc::now();
        let time_of_command = batch_time.to_rfc3339_opts(SecondsFormat::Secs, true);
        let snapshot = self.cache.snapshot();

        let mut enriched = Vec::with_capacity(records.len());
        let mut bytes: u64 = 0;
        let mut max_latency_ms = 0.0_f64;
        let mut max_latency_container = String::new();

        for record in records {
            let path = ContainerPathInfo::parse(&record.filepath);
            if self.is_excluded(&record.stream, &path) {
                continue;
            }
            let item = EnrichedLogRecord {
                log_entry: record.log.clone(),
                log_entry_source: record.stream.clone(),
                log_entry_time_stamp: record.time.clone(),
                time_of_command: time_of_command.clone(),
                image: snapshot.image(&path.container_id).map(str::to_string),
                name: snapshot.name(&path.container_id).map(str::to_string),
                container_id: path.container_id,
                computer: self.config.hostname.clone(),
                pod_name: path.pod_name,
                pod_namespace: path.namespace,
                container_name: path.container_name,
            };
            bytes += item.log_entry.len() as u64;

            if !item.log_entry_time_stamp.is_empty() {
                match DateTime::parse_from_rfc3339(&item.log_entry_time_stamp) {
                    Ok(logged) => {
                        let latency = (batch_time - logged.with_timezone(&Utc)).num_milliseconds()
                            as f64;
                        if latency >= max_latency_ms {
                            max_latency_ms = latency;
                            max_latency_container = item.latency_key();
                        }
                    }
                    Err(e) => {
                        let message = format!(
                            "Error while converting LogEntryTimeStamp for telemetry purposes: {e}"
                        );
                        warn!("LOGS | {}", message);
                        self.telemetry.send_exception(&message);
                    }
                }
            }
            enriched.push(item);
        }

        if enriched.is_empty() {
            debug!("LOGS | Nothing to send after filtering {} records", records.len());
            return DeliveryResult::Accepted;
        }

        match self.backend.send(&enriched).await {
            Ok(sent) => {
                let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(
                    "LOGS | Successfully flushed {} container log records via {} in {} ms",
                    sent,
                    self.backend.name(),
                    elapsed_ms
                );
                self.counters.record_log_batch(&LogBatchStats {
                    records: sent as u64,
                    bytes,
                    elapsed_ms,
                    max_latency_ms,
                    max_latency_container,
                });
                DeliveryResult::Accepted
            }
            Err(e) => self.log_delivery_failure(e, enriched.len()),
        }
    }

    fn log_delivery_failure(&self, e: DeliveryError, count: usize) -> DeliveryResult {
        match &e {
            DeliveryError::Payload(message) => {
                error!("LOGS | Dropping {} records: {}", count, message);
                self.telemetry.send_exception(message);
                return DeliveryResult::Accepted;
            }
            DeliveryError::Http { .. } => self.counters.record_log_send_error(e.is_throttled()),
            DeliveryError::SocketConnect(_) => self.counters.record_socket_connect_error(),
            DeliveryError::SocketWrite(_) => self.counters.record_socket_send_error(),
            DeliveryError::IngestorUnavailable(message) => {
                self.telemetry.send_exception(message);
                self.counters.record_ingest_client_error();
            }
            DeliveryError::Ingest(_) => self.counters.record_ingest_send_error(),
        }
        warn!(
            "LOGS | Failed to deliver {} records via {}, will retry: {}",
            count,
            self.backend.name(),
            e
        );
        DeliveryResult::Retry
    }

    async fn deliver_metrics(&self, samples: &[MetricSample]) -> DeliveryResult {
        let mut translation = Translation::default();
        for sample in samples {
            match self.translator.translate(sample) {
                Ok(t) => translation.extend(t),
                Err(e) => {
                    let message = format!("Error translating metric {}: {e}", sample.name);
                    warn!("METRICS | {}", message);
                    self.telemetry.send_exception(&message);
                }
            }
        }
        if translation.points.is_empty() {
            debug!("METRICS | No points derived from {} samples", samples.len());
            return DeliveryResult::Accepted;
        }

        match self
            .ods
            .post_blob(
                INSIGHTS_METRICS_DATA_TYPE,
                IP_NAME,
                &translation.points,
                BlobHeaders::Dated,
            )
            .await
        {
            Ok(()) => {
                info!(
                    "METRICS | Successfully flushed {} telegraf metrics",
                    translation.points.len()
                );
                self.counters
                    .record_metrics_sent(translation.points.len() as u64);
            }
            Err(DeliveryError::Payload(message)) => {
                error!("METRICS | {}", message);
                self.telemetry.send_exception(&message);
                return DeliveryResult::Accepted;
            }
            Err(e) => {
                self.counters.record_metrics_send_error(e.is_throttled());
                return DeliveryResult::Retry;
            }
        }

        if !translation.requests.is_empty() {
            if let Err(e) = self
                .ods
                .post_blob(
                    APP_REQUESTS_DATA_TYPE,
                    TOPOLOGY_IP_NAME,
                    &translation.requests,
                    BlobHeaders::Topology,
                )
                .await
            {
                warn!("METRICS | Failed to send topology requests: {}", e);
                return DeliveryResult::Retry;
            }
        }
        if !translation.dependencies.is_empty() {
            if let Err(e) = self
                .ods
                .post_blob(
                    APP_DEPENDENCIES_DATA_TYPE,
                    TOPOLOGY_IP_NAME,
                    &translation.dependencies,
                    BlobHeaders::Topology,
                )
                .await
            {
                warn!("METRICS | Failed to send topology dependencies: {}", e);
                return DeliveryResult::Retry;
            }
        }
        DeliveryResult::Accepted
    }

    async fn flush_error_events(&self) -> DeliveryResult {
        let flush = self.events.drain();
        if flush.records.is_empty() {
            return DeliveryResult::Accepted;
        }
        let start = Instant::now();
        match self
            .ods
            .post_blob(
                KUBE_MON_AGENT_EVENT_DATA_TYPE,
                IP_NAME,
                &flush.records,
                BlobHeaders::Plain,
            )
            .await
        {
            Ok(()) => {
                info!(
                    "EVENTS | Flushed {} KubeMonAgentEvent records in {} ms",
                    flush.records.len(),
                    start.elapsed().as_millis()
                );
                let mut dimensions = BTreeMap::new();
                dimensions.insert(
                    "ConfigErrorEventCount".to_string(),
                    flush.config_error_count.to_string(),
                );
                dimensions.insert(
                    "PromScrapeErrorEventCount".to_string(),
                    flush.scrape_error_count.to_string(),
                );
                self.telemetry
                    .send_event(KUBE_MON_AGENT_EVENTS_FLUSHED_EVENT, &dimensions);
                DeliveryResult::Accepted
            }
            Err(e) => {
                error!("EVENTS | Failed to flush KubeMonAgentEvent records: {}", e);
                DeliveryResult::Retry
            }
        }
    }

    /// Flushes on every tick after the first until `cancel` fires.
    async fn run_error_flush_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.error_flush_interval;
        info!("EVENTS | Starting error event flush every {:?}", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = self.flush_error_events().await;
                }
                () = cancel.cancelled() => {
                    debug!("EVENTS | Flush loop stopped");
                    break;
                }
            }
        }
    }
}
