// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deduplication of agent error lines into a periodic summary.
//!
//! Configuration errors are kept for the lifetime of the process. Scrape
//! errors are cleared after every flush so each period reports only what was
//! seen during it.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::constants::{
    CONFIG_ERROR_EVENT_CATEGORY, KUBE_MON_AGENT_EVENT_ERROR, KUBE_MON_AGENT_EVENT_INFO,
    KUBE_MON_AGENT_EVENT_WARNING, NO_ERRORS_MESSAGE, NO_ERROR_EVENT_CATEGORY,
    PROM_SCRAPE_ERROR_MARKER, PROM_SCRAPING_ERROR_EVENT_CATEGORY,
};
use crate::records::{ContainerPathInfo, RawLogRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEventKind {
    Config,
    PromScrape,
}

impl ErrorEventKind {
    /// Scrape errors carry the prometheus input marker; everything else
    /// reported on the error channel is a configuration error.
    #[must_use]
    pub fn classify(line: &str) -> ErrorEventKind {
        if line.contains(PROM_SCRAPE_ERROR_MARKER) {
            ErrorEventKind::PromScrape
        } else {
            ErrorEventKind::Config
        }
    }
}

/// Per-message aggregate, serialized into the `Tags` field of the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorEventEntry {
    pub pod_name: String,
    pub container_id: String,
    pub first_occurrence: String,
    pub last_occurrence: String,
    pub count: u64,
}

/// One `KUBE_MON_AGENT_EVENTS_BLOB` item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KubeMonAgentEvent {
    pub computer: String,
    pub collection_time: String,
    pub category: String,
    pub level: String,
    pub cluster_id: String,
    pub cluster_name: String,
    pub message: String,
    pub tags: String,
}

/// Records produced by one flush along with the table sizes at flush time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorEventFlush {
    pub records: Vec<KubeMonAgentEvent>,
    pub config_error_count: usize,
    pub scrape_error_count: usize,
}

#[derive(Debug, Default)]
struct Tables {
    config: BTreeMap<String, ErrorEventEntry>,
    scrape: BTreeMap<String, ErrorEventEntry>,
}

fn config_key(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_prefix('"')
        .and_then(|l| l.strip_suffix('"'))
        .unwrap_or(line)
}

fn scrape_key(line: &str) -> Option<&str> {
    let mut parts = line.split(PROM_SCRAPE_ERROR_MARKER);
    let _prefix = parts.next()?;
    let message = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(message.strip_suffix('\n').unwrap_or(message))
}

#[derive(Debug)]
pub struct ErrorEventAggregator {
    tables: Mutex<Tables>,
    computer: String,
    cluster_id: String,
    cluster_name: String,
}

impl ErrorEventAggregator {
    #[must_use]
    pub fn new(computer: String, cluster_id: String, cluster_name: String) -> Self {
        ErrorEventAggregator {
            tables: Mutex::new(Tables::default()),
            computer,
            cluster_id,
            cluster_name,
        }
    }

    /// Counts one occurrence of the error line carried by `record`.
    pub fn record(&self, kind: ErrorEventKind, record: &RawLogRecord) {
        let key = match kind {
            ErrorEventKind::Config => Some(config_key(&record.log)),
            ErrorEventKind::PromScrape => scrape_key(&record.log),
        };
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            debug!("EVENTS | Ignoring error line without a message");
            return;
        };
        let path = ContainerPathInfo::parse(&record.filepath);

        let mut tables = match self.tables.lock() {
            Ok(tables) => tables,
            Err(poisoned) => poisoned.into_inner(),
        };
        let table = match kind {
            ErrorEventKind::Config => &mut tables.config,
            ErrorEventKind::PromScrape => &mut tables.scrape,
        };
        match table.get_mut(key) {
            Some(entry) => {
                entry.pod_name = path.pod_name;
                entry.container_id = path.container_id;
                entry.last_occurrence.clone_from(&record.time);
                entry.count += 1;
            }
            None => {
                table.insert(
                    key.to_string(),
                    ErrorEventEntry {
                        pod_name: path.pod_name,
                        container_id: path.container_id,
                        first_occurrence: record.time.clone(),
                        last_occurrence: record.time.clone(),
                        count: 1,
                    },
                );
            }
        }
    }

    /// Classifies and records a line from the error channel.
    pub fn record_line(&self, record: &RawLogRecord) {
        self.record(ErrorEventKind::classify(&record.log), record);
    }

    #[must_use]
    pub fn entry(&self, kind: ErrorEventKind, message: &str) -> Option<ErrorEventEntry> {
        let tables = match self.tables.lock() {
            Ok(tables) => tables,
            Err(poisoned) => poisoned.into_inner(),
        };
        match kind {
            ErrorEventKind::Config => tables.config.get(message).cloned(),
            ErrorEventKind::PromScrape => tables.scrape.get(message).cloned(),
        }
    }

    /// Builds the summary records and clears the scrape table.
    ///
    /// When both tables are empty a single informational "no errors" record
    /// is produced instead.
    #[must_use]
    pub fn drain(&self) -> ErrorEventFlush {
        let collection_time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut tables = match self.tables.lock() {
            Ok(tables) => tables,
            Err(poisoned) => poisoned.into_inner(),
        };
        let config_error_count = tables.config.len();
        let scrape_error_count = tables.scrape.len();

        let mut records = Vec::with_capacity(config_error_count + scrape_error_count);
        if config_error_count == 0 && scrape_error_count == 0 {
            records.extend(self.event(
                &collection_time,
                NO_ERROR_EVENT_CATEGORY,
                KUBE_MON_AGENT_EVENT_INFO,
                NO_ERRORS_MESSAGE,
                &ErrorEventEntry::default(),
            ));
        } else {
            for (message, entry) in &tables.config {
                records.extend(self.event(
                    &collection_time,
                    CONFIG_ERROR_EVENT_CATEGORY,
                    KUBE_MON_AGENT_EVENT_ERROR,
                    message,
                    entry,
                ));
            }
            for (message, entry) in &tables.scrape {
                records.extend(self.event(
                    &collection_time,
                    PROM_SCRAPING_ERROR_EVENT_CATEGORY,
                    KUBE_MON_AGENT_EVENT_WARNING,
                    message,
                    entry,
                ));
            }
            tables.scrape.clear();
        }

        ErrorEventFlush {
            records,
            config_error_count,
            scrape_error_count,
        }
    }

    fn event(
        &self,
        collection_time: &str,
        category: &str,
        level: &str,
        message: &str,
        entry: &ErrorEventEntry,
    ) -> Option<KubeMonAgentEvent> {
        let tags = match serde_json::to_string(entry) {
            Ok(tags) => tags,
            Err(e) => {
                warn!("EVENTS | Error while marshalling event tags: {}", e);
                return None;
            }
        };
        Some(KubeMonAgentEvent {
            computer: self.computer.clone(),
            collection_time: collection_time.to_string(),
            category: category.to_string(),
            level: level.to_string(),
            cluster_id: self.cluster_id.clone(),
            cluster_name: self.cluster_name.clone(),
            message: message.to_string(),
            tags,
        })
    }
}
