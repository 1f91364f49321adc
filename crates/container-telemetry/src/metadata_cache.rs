// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container id to image/name lookup, rebuilt from the orchestrator on a timer.
//!
//! Each refresh builds a complete [`CacheSnapshot`] off the read path and
//! publishes it with one pointer swap, so a reader holding a snapshot never
//! observes a half-built map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::PodListError;
use crate::orchestrator::{PodInfo, PodLister};

/// One published generation of the cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    images: HashMap<String, String>,
    names: HashMap<String, String>,
}

impl CacheSnapshot {
    /// Builds the maps from a pod listing. Init containers are included and
    /// statuses without a container id are skipped.
    #[must_use]
    pub fn from_pods(pods: &[PodInfo]) -> CacheSnapshot {
        let mut snapshot = CacheSnapshot::default();
        for pod in pods {
            for status in pod.all_statuses() {
                let id = status.short_id();
                if id.is_empty() {
                    continue;
                }
                snapshot
                    .images
                    .insert(id.to_string(), status.image.clone());
                snapshot
                    .names
                    .insert(id.to_string(), format!("{}/{}", pod.uid, status.name));
            }
        }
        snapshot
    }

    #[must_use]
    pub fn image(&self, container_id: &str) -> Option<&str> {
        self.images.get(container_id).map(String::as_str)
    }

    /// `{podUID}/{containerName}` of the container.
    #[must_use]
    pub fn name(&self, container_id: &str) -> Option<&str> {
        self.names.get(container_id).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

pub struct MetadataCache {
    current: RwLock<Arc<CacheSnapshot>>,
    lister: Option<Arc<dyn PodLister>>,
    node_name: String,
}

impl MetadataCache {
    #[must_use]
    pub fn new(lister: Option<Arc<dyn PodLister>>, node_name: String) -> Self {
        MetadataCache {
            current: RwLock::new(Arc::new(CacheSnapshot::default())),
            lister,
            node_name,
        }
    }

    /// Currently published snapshot. Cheap; callers hold it for a whole batch.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// `(image, name)` of a container in the published snapshot.
    #[must_use]
    pub fn lookup(&self, container_id: &str) -> (Option<String>, Option<String>) {
        let snapshot = self.snapshot();
        (
            snapshot.image(container_id).map(str::to_string),
            snapshot.name(container_id).map(str::to_string),
        )
    }

    pub fn publish(&self, snapshot: CacheSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Lists the node's pods and publishes a new snapshot.
    ///
    /// On error the previous snapshot stays published.
    pub async fn refresh(&self) -> Result<usize, PodListError> {
        let Some(lister) = &self.lister else {
            return Err(PodListError::NotConfigured(
                "no orchestrator client available".to_string(),
            ));
        };
        let pods = lister.list_node_pods(&self.node_name).await?;
        let snapshot = CacheSnapshot::from_pods(&pods);
        let size = snapshot.len();
        self.publish(snapshot);
        debug!("CACHE | Published {} container entries", size);
        Ok(size)
    }

    /// Refreshes on every tick until `cancel` fires. The first tick is
    /// immediate so enrichment is available shortly after startup.
    pub async fn run_refresh_loop(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        info!("CACHE | Starting metadata refresh every {:?}", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!("CACHE | Error refreshing container metadata, keeping previous snapshot: {}", e);
                    }
                }
                () = cancel.cancelled() => {
                    debug!("CACHE | Refresh loop stopped");
                    break;
                }
            }
        }
    }
}
