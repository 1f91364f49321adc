// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Inbound record shapes and the per-backend wire projections of a log line.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::constants::SOURCE_SYSTEM;

/// One tailed log line as handed over by the collection runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawLogRecord {
    #[serde(default)]
    pub filepath: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub time: String,
}

/// Kubernetes identity encoded in a container log file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerPathInfo {
    pub container_id: String,
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
}

fn slice_between(s: &str, start: Option<usize>, start_len: usize, end: Option<usize>) -> String {
    match (start, end) {
        (Some(start), Some(end)) if start < end => s[start + start_len..end].to_string(),
        _ => String::new(),
    }
}

impl ContainerPathInfo {
    /// Parses `/var/log/containers/<pod>_<namespace>_<container>-<id>.log`.
    ///
    /// Each component is empty when its delimiters are missing or out of order.
    #[must_use]
    pub fn parse(filepath: &str) -> ContainerPathInfo {
        const CONTAINERS_DIR: &str = "/containers/";

        let last_dash = filepath.rfind('-');
        let last_dot = filepath.rfind('.');
        let first_underscore = filepath.find('_');
        let last_underscore = filepath.rfind('_');
        let containers_dir = filepath.find(CONTAINERS_DIR);

        let container_id = slice_between(filepath, last_dash, 1, last_dot);
        let namespace = slice_between(filepath, first_underscore, 1, last_underscore);
        let container_name = slice_between(filepath, last_underscore, 1, last_dash);
        let pod_name = match (containers_dir, first_underscore) {
            (Some(start), Some(end)) if start + CONTAINERS_DIR.len() <= end => {
                filepath[start + CONTAINERS_DIR.len()..end].to_string()
            }
            _ => String::new(),
        };

        ContainerPathInfo {
            container_id,
            namespace,
            pod_name,
            container_name,
        }
    }
}

/// A raw log line joined with cache metadata and process identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichedLogRecord {
    pub log_entry: String,
    pub log_entry_source: String,
    pub log_entry_time_stamp: String,
    pub time_of_command: String,
    pub container_id: String,
    pub image: Option<String>,
    pub name: Option<String>,
    pub computer: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub container_name: String,
}

impl EnrichedLogRecord {
    /// `"{Name}={Id}"`, used to attribute the max observed latency.
    #[must_use]
    pub fn latency_key(&self) -> String {
        format!(
            "{}={}",
            self.name.as_deref().unwrap_or_default(),
            self.container_id
        )
    }

    #[must_use]
    pub fn to_data_item(&self) -> DataItem {
        DataItem {
            log_entry: self.log_entry.clone(),
            log_entry_source: self.log_entry_source.clone(),
            log_entry_time_stamp: self.log_entry_time_stamp.clone(),
            time_of_command: self.time_of_command.clone(),
            id: self.container_id.clone(),
            image: self.image.clone().unwrap_or_default(),
            name: self.name.clone().unwrap_or_default(),
            source_system: SOURCE_SYSTEM.to_string(),
            computer: self.computer.clone(),
        }
    }

    /// String map carried by one streaming-socket entry.
    #[must_use]
    pub fn to_forward_record(&self) -> BTreeMap<String, String> {
        let mut record = BTreeMap::new();
        record.insert("LogEntry".to_string(), self.log_entry.clone());
        record.insert("LogEntrySource".to_string(), self.log_entry_source.clone());
        record.insert(
            "LogEntryTimeStamp".to_string(),
            self.log_entry_time_stamp.clone(),
        );
        record.insert("SourceSystem".to_string(), SOURCE_SYSTEM.to_string());
        record.insert("Id".to_string(), self.container_id.clone());
        if let Some(image) = &self.image {
            record.insert("Image".to_string(), image.clone());
        }
        if let Some(name) = &self.name {
            record.insert("Name".to_string(), name.clone());
        }
        record.insert("TimeOfCommand".to_string(), self.time_of_command.clone());
        record.insert("Computer".to_string(), self.computer.clone());
        record
    }

    #[must_use]
    pub fn to_columnar_row(&self, resource_id: Option<&str>) -> ColumnarRow {
        ColumnarRow {
            time_generated: self.log_entry_time_stamp.clone(),
            computer: self.computer.clone(),
            container_id: self.container_id.clone(),
            container_name: self.container_name.clone(),
            pod_name: self.pod_name.clone(),
            pod_namespace: self.pod_namespace.clone(),
            log_message: self.log_entry.clone(),
            log_source: self.log_entry_source.clone(),
            azure_resource_id: resource_id.unwrap_or_default().to_string(),
        }
    }
}

/// Batch HTTP item of a `CONTAINER_LOG_BLOB`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataItem {
    #[serde(rename = "LogEntry")]
    pub log_entry: String,
    #[serde(rename = "LogEntrySource")]
    pub log_entry_source: String,
    #[serde(rename = "LogEntryTimeStamp")]
    pub log_entry_time_stamp: String,
    #[serde(rename = "TimeOfCommand")]
    pub time_of_command: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "SourceSystem")]
    pub source_system: String,
    #[serde(rename = "Computer")]
    pub computer: String,
}

/// One line of the columnar JSON stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnarRow {
    pub time_generated: String,
    pub computer: String,
    #[serde(rename = "ContainerID")]
    pub container_id: String,
    pub container_name: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub log_message: String,
    pub log_source: String,
    pub azure_resource_id: String,
}

/// Value of one metric field. Strings are carried through but never emitted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    /// Numeric view of the value; `None` for types the backend cannot store.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            FieldValue::Str(_) => None,
        }
    }
}

/// A generic metric sample from the collection runtime.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MetricSample {
    pub name: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

/// Flat metric point of an `INSIGHTS_METRICS_BLOB`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TelegrafPoint {
    pub origin: String,
    pub namespace: String,
    pub name: String,
    pub value: f64,
    pub tags: String,
    pub collection_time: String,
    pub computer: String,
}

/// Request half of a synthesized topology pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopologyRequest {
    #[serde(rename = "time")]
    pub time: String,
    pub id: String,
    pub operation_id: String,
    pub parent_id: String,
    pub name: String,
    pub app_role_name: String,
    pub success: bool,
    pub result_code: String,
    pub duration_ms: f64,
    pub item_count: i64,
}

/// Dependency half of a synthesized topology pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopologyDependency {
    #[serde(rename = "time")]
    pub time: String,
    pub id: String,
    pub operation_id: String,
    pub target: String,
    pub name: String,
    pub dependency_type: String,
    pub app_role_name: String,
    pub success: bool,
    pub result_code: String,
    pub duration_ms: f64,
    pub item_count: i64,
}

/// `{DataType, IPName, DataItems}` envelope posted to the batch endpoint.
#[derive(Debug, Serialize)]
pub struct Blob<'a, T: Serialize> {
    #[serde(rename = "DataType")]
    pub data_type: &'a str,
    #[serde(rename = "IPName")]
    pub ip_name: &'a str,
    #[serde(rename = "DataItems")]
    pub data_items: &'a [T],
}
