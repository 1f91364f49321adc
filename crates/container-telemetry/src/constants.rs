// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire-level names shared by the translator, the backends and the error-event flush.

use std::time::Duration;

/// Host runtime return code for a fully processed batch.
pub const FLB_OK: i32 = 1;
/// Host runtime return code asking for redelivery.
pub const FLB_RETRY: i32 = 2;

pub const CONTAINER_LOG_DATA_TYPE: &str = "CONTAINER_LOG_BLOB";
pub const INSIGHTS_METRICS_DATA_TYPE: &str = "INSIGHTS_METRICS_BLOB";
pub const APP_REQUESTS_DATA_TYPE: &str = "APPLICATIONINSIGHTS_APPREQUESTS";
pub const APP_DEPENDENCIES_DATA_TYPE: &str = "APPLICATIONINSIGHTS_APPDEPENDENCIES";
pub const KUBE_MON_AGENT_EVENT_DATA_TYPE: &str = "KUBE_MON_AGENT_EVENTS_BLOB";

/// Intelligence pack name for container logs, metrics and agent events.
pub const IP_NAME: &str = "Containers";
/// Intelligence pack name for topology uploads.
pub const TOPOLOGY_IP_NAME: &str = "LogManagement";
pub const TOPOLOGY_API_VERSION: &str = "2016-04-01";

pub const SOURCE_SYSTEM: &str = "Containers";

/// Prefix of the origin field and of the cluster identity tags added to every point.
pub const TELEGRAF_METRIC_ORIGIN_PREFIX: &str = "container.azm.ms";
pub const TELEGRAF_METRIC_ORIGIN_SUFFIX: &str = "telegraf";
pub const TELEGRAF_TAG_CLUSTER_ID: &str = "clusterId";
pub const TELEGRAF_TAG_CLUSTER_NAME: &str = "clusterName";

/// Field that marks an active upstream request between two meshed services.
pub const TOPOLOGY_TRIGGER_FIELD: &str = "envoy_cluster_upstream_rq_active";
pub const TOPOLOGY_NAMESPACE_PREFIX: &str = "container.azm.ms.osm";
pub const TOPOLOGY_SOURCE_APP_TAG: &str = "app";
pub const TOPOLOGY_DESTINATION_APP_TAG: &str = "envoy_cluster_name";

pub const CONFIG_ERROR_EVENT_CATEGORY: &str = "container.azm.ms/configmap";
pub const PROM_SCRAPING_ERROR_EVENT_CATEGORY: &str = "container.azm.ms/promscraping";
pub const NO_ERROR_EVENT_CATEGORY: &str = "container.azm.ms/noerror";
pub const KUBE_MON_AGENT_EVENT_ERROR: &str = "Error";
pub const KUBE_MON_AGENT_EVENT_WARNING: &str = "Warning";
pub const KUBE_MON_AGENT_EVENT_INFO: &str = "Info";
pub const KUBE_MON_AGENT_EVENTS_FLUSHED_EVENT: &str = "KubeMonAgentEventsFlushed";
pub const NO_ERRORS_MESSAGE: &str = "No errors";
/// Marker preceding the message of a prometheus scrape error line.
pub const PROM_SCRAPE_ERROR_MARKER: &str = "E! [inputs.prometheus]: ";

/// Fluent forward tag expected by the local socket listener.
pub const FORWARD_SOURCE_NAME: &str = "ContainerLogSource";

pub const COLUMNAR_TABLE: &str = "ContainerLogV2";
pub const COLUMNAR_MAPPING: &str = "ContainerLogv2Mapping";
pub const DEFAULT_COLUMNAR_DATABASE: &str = "containerinsights";

pub const DEFAULT_CACHE_REFRESH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_ERROR_FLUSH_INTERVAL_MINS: u64 = 60;
pub const DEFAULT_AGENT_VERSION: &str = "9.0.0.0";
pub const AGENT_NAME: &str = "ContainerAgent";
pub const DEFAULT_FORWARD_SOCKET_PATH: &str = "/var/run/mdsd/default_fluent.socket";

/// Bound on a single streaming-socket write.
pub const SOCKET_WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Bound on a single columnar ingestion attempt.
pub const INGEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout of the HTTP client.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a fatally misconfigured host waits before exiting.
pub const FATAL_EXIT_DELAY: Duration = Duration::from_secs(30);

pub const RESOURCE_ID_HEADER: &str = "x-ms-azureresourceid";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
