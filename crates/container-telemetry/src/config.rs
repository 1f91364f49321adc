// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::constants::{
    AGENT_NAME, DEFAULT_AGENT_VERSION, DEFAULT_CACHE_REFRESH_INTERVAL_SECS,
    DEFAULT_COLUMNAR_DATABASE, DEFAULT_ERROR_FLUSH_INTERVAL_MINS, DEFAULT_FORWARD_SOCKET_PATH,
};
use crate::errors::ConfigError;
use crate::hostname::get_hostname;

const ROUTE_STREAMING_SOCKET: &str = "v2";
const ROUTE_COLUMNAR: &str = "adx";
const COLLECTOR_CONTROLLER_TYPE: &str = "daemonset";

/// Credentials and target of the columnar ingestion route.
#[derive(Clone, PartialEq, Eq)]
pub struct ColumnarSettings {
    pub cluster_uri: Url,
    pub client_id: String,
    pub tenant_id: String,
    pub client_secret: String,
    pub database: String,
}

impl std::fmt::Debug for ColumnarSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnarSettings")
            .field("cluster_uri", &self.cluster_uri.as_str())
            .field("client_id", &self.client_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_secret", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Backend used for container log batches, fixed for the lifetime of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    BatchHttp,
    StreamingSocket { path: PathBuf },
    Columnar(ColumnarSettings),
}

impl Route {
    /// Picks the log route from the requested route name.
    ///
    /// Falls back to [`Route::BatchHttp`] when the streaming socket is requested
    /// on Windows or when any columnar credential is missing or invalid.
    pub fn resolve<F>(lookup: &F, is_windows: bool) -> Route
    where
        F: Fn(&str) -> Option<String>,
    {
        let requested = lookup("AZMON_CONTAINER_LOGS_EFFECTIVE_ROUTE")
            .map(|r| r.trim().to_lowercase())
            .unwrap_or_default();
        debug!("AZMON_CONTAINER_LOGS_EFFECTIVE_ROUTE: {}", requested);

        match requested.as_str() {
            ROUTE_STREAMING_SOCKET if !is_windows => {
                let path = lookup("MDSD_FLUENT_SOCKET_PATH")
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FORWARD_SOCKET_PATH.to_string());
                info!("Routing container logs thru {} route", ROUTE_STREAMING_SOCKET);
                Route::StreamingSocket {
                    path: PathBuf::from(path),
                }
            }
            ROUTE_STREAMING_SOCKET => {
                warn!("Streaming socket route is unavailable on windows, using batch HTTP");
                Route::BatchHttp
            }
            ROUTE_COLUMNAR => match read_columnar_settings(lookup) {
                Some(settings) => {
                    info!("Routing container logs thru {} route", ROUTE_COLUMNAR);
                    Route::Columnar(settings)
                }
                None => {
                    warn!("Columnar credentials incomplete, using batch HTTP");
                    Route::BatchHttp
                }
            },
            _ => Route::BatchHttp,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Route::BatchHttp => "batch-http",
            Route::StreamingSocket { .. } => ROUTE_STREAMING_SOCKET,
            Route::Columnar(_) => ROUTE_COLUMNAR,
        }
    }
}

fn read_secret_file(path: Option<String>, what: &str) -> Option<String> {
    let path = path.filter(|p| !p.trim().is_empty())?;
    match std::fs::read_to_string(Path::new(&path)) {
        Ok(contents) => {
            let value = contents.trim().to_string();
            if value.is_empty() {
                warn!("{} file {} is empty", what, path);
                None
            } else {
                Some(value)
            }
        }
        Err(e) => {
            warn!("Error when reading {} from {}: {}", what, path, e);
            None
        }
    }
}

fn read_columnar_settings<F>(lookup: &F) -> Option<ColumnarSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let cluster_uri = read_secret_file(lookup("AZMON_ADX_CLUSTER_URI_PATH"), "cluster uri");
    let cluster_uri = match cluster_uri.as_deref().map(Url::parse) {
        Some(Ok(url)) if url.has_host() => Some(url),
        Some(_) => {
            warn!("Invalid columnar cluster uri");
            None
        }
        None => None,
    };
    let client_id = read_secret_file(lookup("AZMON_ADX_CLIENT_ID_PATH"), "client id");
    let tenant_id = read_secret_file(lookup("AZMON_ADX_TENANT_ID_PATH"), "tenant id");
    let client_secret = read_secret_file(lookup("AZMON_ADX_CLIENT_SECRET_PATH"), "client secret");
    let database = lookup("AZMON_ADX_DATABASE_NAME")
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_COLUMNAR_DATABASE.to_string());

    Some(ColumnarSettings {
        cluster_uri: cluster_uri?,
        client_id: client_id?,
        tenant_id: tenant_id?,
        client_secret: client_secret?,
        database,
    })
}

fn excluded_namespaces<F>(lookup: &F, collect_key: &str, list_key: &str) -> HashSet<String>
where
    F: Fn(&str) -> Option<String>,
{
    if lookup(collect_key).as_deref() != Some("true") {
        return HashSet::new();
    }
    lookup(list_key)
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Everything the delivery engine needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub route: Route,
    pub ods_endpoint: String,
    pub workspace_id: String,
    pub resource_centric: bool,
    pub resource_id: String,
    pub resource_name: String,
    pub enrich_container_logs: bool,
    pub stdout_excluded_namespaces: HashSet<String>,
    pub stderr_excluded_namespaces: HashSet<String>,
    pub collector_role: bool,
    pub is_windows: bool,
    pub cache_refresh_interval: Duration,
    pub error_flush_interval: Duration,
    pub hostname: String,
    pub agent_version: String,
    pub proxy_https: Option<String>,
    pub allow_partial_topology: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            route: Route::BatchHttp,
            ods_endpoint: "http://localhost/OperationalData.svc/PostJsonDataItems".to_string(),
            workspace_id: String::new(),
            resource_centric: false,
            resource_id: String::new(),
            resource_name: String::new(),
            enrich_container_logs: false,
            stdout_excluded_namespaces: HashSet::new(),
            stderr_excluded_namespaces: HashSet::new(),
            collector_role: false,
            is_windows: false,
            cache_refresh_interval: Duration::from_secs(DEFAULT_CACHE_REFRESH_INTERVAL_SECS),
            error_flush_interval: Duration::from_secs(DEFAULT_ERROR_FLUSH_INTERVAL_MINS * 60),
            hostname: "unknown".to_string(),
            agent_version: DEFAULT_AGENT_VERSION.to_string(),
            proxy_https: None,
            allow_partial_topology: true,
        }
    }
}

impl EngineConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<EngineConfig, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<EngineConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let is_windows = non_empty("OS_TYPE").is_some_and(|os| os.eq_ignore_ascii_case("windows"));

        let workspace_id = non_empty("WSID").unwrap_or_default();
        let ods_endpoint = match non_empty("OMS_ENDPOINT") {
            Some(endpoint) => endpoint,
            None => match non_empty("DOMAIN") {
                Some(domain) if !workspace_id.is_empty() => format!(
                    "https://{workspace_id}.ods.{domain}/OperationalData.svc/PostJsonDataItems"
                ),
                _ => return Err(ConfigError::Missing("OMS_ENDPOINT or WSID and DOMAIN")),
            },
        };

        let (resource_centric, resource_id, resource_name) = match non_empty("AKS_RESOURCE_ID") {
            Some(id) => {
                let name = id.rsplit('/').next().unwrap_or_default().to_string();
                (true, id, name)
            }
            None => {
                let name = lookup("ACS_RESOURCE_NAME").unwrap_or_default();
                (false, name.clone(), name)
            }
        };
        debug!(
            "ResourceCentric: {}, ResourceID: {}, ResourceName: {}",
            resource_centric, resource_id, resource_name
        );

        let cache_refresh_interval = match non_empty("AZMON_CONTAINER_INVENTORY_REFRESH_INTERVAL") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    warn!(
                        "Invalid container inventory refresh interval {:?}, using default of {}s",
                        raw, DEFAULT_CACHE_REFRESH_INTERVAL_SECS
                    );
                    DEFAULT_CACHE_REFRESH_INTERVAL_SECS
                }
            },
            None => DEFAULT_CACHE_REFRESH_INTERVAL_SECS,
        };

        let error_flush_minutes = match non_empty("AZMON_ERROR_EVENT_FLUSH_INTERVAL") {
            Some(raw) => match raw.trim().parse::<u64>().ok().filter(|mins| *mins > 0) {
                Some(mins) if mins.checked_mul(60).is_some() => mins,
                _ => {
                    warn!(
                        "Invalid error event flush interval {:?}, using default of {}m",
                        raw, DEFAULT_ERROR_FLUSH_INTERVAL_MINS
                    );
                    DEFAULT_ERROR_FLUSH_INTERVAL_MINS
                }
            },
            None => DEFAULT_ERROR_FLUSH_INTERVAL_MINS,
        };

        let hostname = non_empty("HOSTNAME").unwrap_or_else(get_hostname);
        let agent_version = non_empty("DOCKER_CIMPROV_VERSION")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_AGENT_VERSION.to_string());
        let proxy_https = non_empty("PROXY")
            .or_else(|| non_empty("HTTPS_PROXY"))
            .map(|p| p.trim().to_string());

        let allow_partial_topology = match non_empty("AZMON_TOPOLOGY_ALLOW_PARTIAL") {
            Some(v) => !v.trim().eq_ignore_ascii_case("false"),
            None => true,
        };

        let collector_role = non_empty("CONTROLLER_TYPE")
            .is_some_and(|c| c.eq_ignore_ascii_case(COLLECTOR_CONTROLLER_TYPE));
        // only the per-node collector tails container logs
        let (stdout_excluded_namespaces, stderr_excluded_namespaces) = if collector_role {
            (
                excluded_namespaces(
                    &lookup,
                    "AZMON_COLLECT_STDOUT_LOGS",
                    "AZMON_STDOUT_EXCLUDED_NAMESPACES",
                ),
                excluded_namespaces(
                    &lookup,
                    "AZMON_COLLECT_STDERR_LOGS",
                    "AZMON_STDERR_EXCLUDED_NAMESPACES",
                ),
            )
        } else {
            (HashSet::new(), HashSet::new())
        };

        let config = EngineConfig {
            route: Route::resolve(&lookup, is_windows),
            ods_endpoint,
            workspace_id,
            resource_centric,
            resource_id,
            resource_name,
            enrich_container_logs: lookup("AZMON_CLUSTER_CONTAINER_LOG_ENRICH").as_deref()
                == Some("true"),
            stdout_excluded_namespaces,
            stderr_excluded_namespaces,
            collector_role,
            is_windows,
            cache_refresh_interval: Duration::from_secs(cache_refresh_interval),
            error_flush_interval: Duration::from_secs(error_flush_minutes.saturating_mul(60)),
            hostname,
            agent_version,
            proxy_https,
            allow_partial_topology,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = Url::parse(&self.ods_endpoint)
            .map_err(|e| ConfigError::Invalid(format!("ods endpoint {}: {e}", self.ods_endpoint)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "ods endpoint {} must be http or https",
                self.ods_endpoint
            )));
        }
        if self.cache_refresh_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "cache refresh interval must be positive".to_string(),
            ));
        }
        if self.error_flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "error event flush interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn user_agent(&self) -> String {
        format!("{}/{}", AGENT_NAME, self.agent_version)
    }

    /// Value of the cluster id tag and of the `ClusterId` event field.
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.resource_id
    }

    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.resource_name
    }

    /// Whether the metadata cache refresh loop runs for this process.
    #[must_use]
    pub fn runs_cache_refresh(&self) -> bool {
        self.collector_role
            && self.enrich_container_logs
            && !matches!(self.route, Route::Columnar(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn secret_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create secret file");
        file.write_all(contents.as_bytes()).expect("write secret file");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_missing_endpoint_is_fatal() {
        let result = EngineConfig::from_lookup(lookup_from(&[("WSID", "abc")]));
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_endpoint_from_workspace_and_domain() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("WSID", "0000-1111"),
            ("DOMAIN", "opinsights.azure.com"),
        ]))
        .expect("config");
        assert_eq!(
            config.ods_endpoint,
            "https://0000-1111.ods.opinsights.azure.com/OperationalData.svc/PostJsonDataItems"
        );
        assert_eq!(config.workspace_id, "0000-1111");
        assert_eq!(config.route, Route::BatchHttp);
    }

    #[test]
    fn test_resource_centric_mode() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/OperationalData.svc/PostJsonDataItems"),
            (
                "AKS_RESOURCE_ID",
                "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/my-cluster",
            ),
        ]))
        .expect("config");
        assert!(config.resource_centric);
        assert_eq!(config.cluster_name(), "my-cluster");
        assert!(config.cluster_id().ends_with("/managedClusters/my-cluster"));
    }

    #[test]
    fn test_non_resource_centric_uses_resource_name() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("ACS_RESOURCE_NAME", "acs-cluster"),
        ]))
        .expect("config");
        assert!(!config.resource_centric);
        assert_eq!(config.cluster_id(), "acs-cluster");
        assert_eq!(config.cluster_name(), "acs-cluster");
    }

    #[test]
    fn test_streaming_socket_route() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("AZMON_CONTAINER_LOGS_EFFECTIVE_ROUTE", " V2 "),
        ]))
        .expect("config");
        assert_eq!(
            config.route,
            Route::StreamingSocket {
                path: PathBuf::from(DEFAULT_FORWARD_SOCKET_PATH)
            }
        );
    }

    #[test]
    fn test_streaming_socket_disabled_on_windows() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("AZMON_CONTAINER_LOGS_EFFECTIVE_ROUTE", "v2"),
            ("OS_TYPE", "Windows"),
        ]))
        .expect("config");
        assert_eq!(config.route, Route::BatchHttp);
        assert!(config.is_windows);
    }

    #[test]
    fn test_columnar_route_with_complete_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let uri = secret_file(&dir, "uri", "https://mycluster.kusto.windows.net\n");
        let client = secret_file(&dir, "client", "client-id");
        let tenant = secret_file(&dir, "tenant", "tenant-id");
        let secret = secret_file(&dir, "secret", "s3cr3t");
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("AZMON_CONTAINER_LOGS_EFFECTIVE_ROUTE", "adx"),
            ("AZMON_ADX_CLUSTER_URI_PATH", &uri),
            ("AZMON_ADX_CLIENT_ID_PATH", &client),
            ("AZMON_ADX_TENANT_ID_PATH", &tenant),
            ("AZMON_ADX_CLIENT_SECRET_PATH", &secret),
        ]))
        .expect("config");
        match config.route {
            Route::Columnar(settings) => {
                assert_eq!(settings.cluster_uri.host_str(), Some("mycluster.kusto.windows.net"));
                assert_eq!(settings.client_secret, "s3cr3t");
                assert_eq!(settings.database, DEFAULT_COLUMNAR_DATABASE);
                assert!(!format!("{settings:?}").contains("s3cr3t"));
            }
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn test_columnar_route_falls_back_without_secret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let uri = secret_file(&dir, "uri", "https://mycluster.kusto.windows.net");
        let client = secret_file(&dir, "client", "client-id");
        let tenant = secret_file(&dir, "tenant", "tenant-id");
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("AZMON_CONTAINER_LOGS_EFFECTIVE_ROUTE", "adx"),
            ("AZMON_ADX_CLUSTER_URI_PATH", &uri),
            ("AZMON_ADX_CLIENT_ID_PATH", &client),
            ("AZMON_ADX_TENANT_ID_PATH", &tenant),
            ("AZMON_ADX_CLIENT_SECRET_PATH", "/nonexistent/secret"),
        ]))
        .expect("config");
        assert_eq!(config.route, Route::BatchHttp);
    }

    #[test]
    fn test_columnar_route_rejects_invalid_uri() {
        let dir = tempfile::tempdir().expect("tempdir");
        let uri = secret_file(&dir, "uri", "not a url");
        let client = secret_file(&dir, "client", "client-id");
        let tenant = secret_file(&dir, "tenant", "tenant-id");
        let secret = secret_file(&dir, "secret", "s3cr3t");
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("AZMON_CONTAINER_LOGS_EFFECTIVE_ROUTE", "adx"),
            ("AZMON_ADX_CLUSTER_URI_PATH", &uri),
            ("AZMON_ADX_CLIENT_ID_PATH", &client),
            ("AZMON_ADX_TENANT_ID_PATH", &tenant),
            ("AZMON_ADX_CLIENT_SECRET_PATH", &secret),
        ]))
        .expect("config");
        assert_eq!(config.route, Route::BatchHttp);
    }

    #[test]
    fn test_excluded_namespaces_need_collect_flag() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("CONTROLLER_TYPE", "DaemonSet"),
            ("AZMON_COLLECT_STDOUT_LOGS", "true"),
            ("AZMON_STDOUT_EXCLUDED_NAMESPACES", "kube-system, gatekeeper-system ,"),
            ("AZMON_COLLECT_STDERR_LOGS", "false"),
            ("AZMON_STDERR_EXCLUDED_NAMESPACES", "kube-system"),
        ]))
        .expect("config");
        assert_eq!(config.stdout_excluded_namespaces.len(), 2);
        assert!(config.stdout_excluded_namespaces.contains("gatekeeper-system"));
        assert!(config.stderr_excluded_namespaces.is_empty());
    }

    #[test]
    fn test_excluded_namespaces_only_for_collector() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("CONTROLLER_TYPE", "ReplicaSet"),
            ("AZMON_COLLECT_STDOUT_LOGS", "true"),
            ("AZMON_STDOUT_EXCLUDED_NAMESPACES", "kube-system"),
            ("AZMON_COLLECT_STDERR_LOGS", "true"),
            ("AZMON_STDERR_EXCLUDED_NAMESPACES", "kube-system"),
        ]))
        .expect("config");
        assert!(!config.collector_role);
        assert!(config.stdout_excluded_namespaces.is_empty());
        assert!(config.stderr_excluded_namespaces.is_empty());
    }

    #[test]
    fn test_oversized_flush_interval_uses_default() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("AZMON_ERROR_EVENT_FLUSH_INTERVAL", "18446744073709551615"),
        ]))
        .expect("config");
        assert_eq!(config.error_flush_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_intervals_and_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("OMS_ENDPOINT", "https://ods.example.com/x"),
            ("AZMON_CONTAINER_INVENTORY_REFRESH_INTERVAL", "not-a-number"),
            ("AZMON_ERROR_EVENT_FLUSH_INTERVAL", "5"),
            ("DOCKER_CIMPROV_VERSION", "16.0.0-0"),
        ]))
        .expect("config");
        assert_eq!(config.cache_refresh_interval, Duration::from_secs(60));
        assert_eq!(config.error_flush_interval, Duration::from_secs(300));
        assert_eq!(config.user_agent(), "ContainerAgent/16.0.0-0");
        assert!(config.allow_partial_topology);
        assert!(!config.collector_role);
    }

    #[test]
    fn test_cache_refresh_only_for_collector_with_enrichment() {
        let mut config = EngineConfig {
            collector_role: true,
            enrich_container_logs: true,
            ..EngineConfig::default()
        };
        assert!(config.runs_cache_refresh());
        config.route = Route::Columnar(ColumnarSettings {
            cluster_uri: Url::parse("https://c.kusto.windows.net").expect("url"),
            client_id: "a".to_string(),
            tenant_id: "b".to_string(),
            client_secret: "c".to_string(),
            database: "d".to_string(),
        });
        assert!(!config.runs_cache_refresh());
        config.route = Route::BatchHttp;
        config.enrich_container_logs = false;
        assert!(!config.runs_cache_refresh());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let config = EngineConfig {
            ods_endpoint: "ftp://example.com".to_string(),
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("OMS_ENDPOINT", "https://ods.example.com/OperationalData.svc/PostJsonDataItems");
        env::set_var("CONTROLLER_TYPE", "DaemonSet");
        env::set_var("AZMON_CLUSTER_CONTAINER_LOG_ENRICH", "true");
        env::set_var("AZMON_TOPOLOGY_ALLOW_PARTIAL", "false");
        let config = EngineConfig::from_env().expect("config");
        assert!(config.collector_role);
        assert!(config.enrich_container_logs);
        assert!(!config.allow_partial_topology);
        env::remove_var("OMS_ENDPOINT");
        env::remove_var("CONTROLLER_TYPE");
        env::remove_var("AZMON_CLUSTER_CONTAINER_LOG_ENRICH");
        env::remove_var("AZMON_TOPOLOGY_ALLOW_PARTIAL");
    }
}
