// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read-only view of the pods scheduled on the local node.

use std::env;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::constants::HTTP_TIMEOUT;
use crate::errors::PodListError;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContainerStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    /// Runtime-prefixed id, e.g. `containerd://<64 hex>`.
    #[serde(default, rename = "containerID")]
    pub container_id: String,
}

impl ContainerStatus {
    /// Container id with the runtime prefix removed.
    #[must_use]
    pub fn short_id(&self) -> &str {
        match self.container_id.rfind('/') {
            Some(idx) => &self.container_id[idx + 1..],
            None => &self.container_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodInfo {
    pub uid: String,
    pub container_statuses: Vec<ContainerStatus>,
    pub init_container_statuses: Vec<ContainerStatus>,
}

impl PodInfo {
    /// Regular and init container statuses, in that order.
    pub fn all_statuses(&self) -> impl Iterator<Item = &ContainerStatus> {
        self.container_statuses
            .iter()
            .chain(self.init_container_statuses.iter())
    }
}

/// Lists the pods scheduled on a node.
#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list_node_pods(&self, node: &str) -> Result<Vec<PodInfo>, PodListError>;
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodMetadata {
    #[serde(default)]
    uid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    init_container_statuses: Vec<ContainerStatus>,
}

impl From<Pod> for PodInfo {
    fn from(pod: Pod) -> Self {
        PodInfo {
            uid: pod.metadata.uid,
            container_statuses: pod.status.container_statuses,
            init_container_statuses: pod.status.init_container_statuses,
        }
    }
}

/// Pod lister backed by the Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubeApiPodLister {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl KubeApiPodLister {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: String, token: String) -> Self {
        KubeApiPodLister {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Builds a lister from the in-cluster service account.
    pub fn in_cluster() -> Result<Self, PodListError> {
        let host = env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| PodListError::NotConfigured("KUBERNETES_SERVICE_HOST not set".into()))?;
        let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let dir = Path::new(SERVICE_ACCOUNT_DIR);

        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| PodListError::NotConfigured(format!("service account token: {e}")))?;
        let ca = std::fs::read(dir.join("ca.crt"))
            .map_err(|e| PodListError::NotConfigured(format!("service account CA: {e}")))?;
        let certificate = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| PodListError::NotConfigured(format!("invalid CA: {e}")))?;

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(certificate)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| PodListError::NotConfigured(e.to_string()))?;

        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };
        Ok(Self::new(
            client,
            format!("https://{host}:{port}"),
            token.trim().to_string(),
        ))
    }
}

#[async_trait]
impl PodLister for KubeApiPodLister {
    async fn list_node_pods(&self, node: &str) -> Result<Vec<PodInfo>, PodListError> {
        let url = format!("{}/api/v1/pods", self.base_url);
        let selector = format!("spec.nodeName={node}");
        debug!("CACHE | Listing pods with field selector {}", selector);

        let resp = self
            .client
            .get(&url)
            .query(&[("fieldSelector", selector.as_str())])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PodListError::Request(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| PodListError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(PodListError::Request(format!(
                "status {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        let list: PodList =
            serde_json::from_slice(&body).map_err(|e| PodListError::Decode(e.to_string()))?;
        Ok(list.items.into_iter().map(PodInfo::from).collect())
    }
}
