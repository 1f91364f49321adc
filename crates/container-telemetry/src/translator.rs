// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric sample translation into flat points and topology pairs.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::{
    TELEGRAF_METRIC_ORIGIN_PREFIX, TELEGRAF_METRIC_ORIGIN_SUFFIX, TELEGRAF_TAG_CLUSTER_ID,
    TELEGRAF_TAG_CLUSTER_NAME, TOPOLOGY_DESTINATION_APP_TAG, TOPOLOGY_NAMESPACE_PREFIX,
    TOPOLOGY_SOURCE_APP_TAG, TOPOLOGY_TRIGGER_FIELD,
};
use crate::errors::TranslateError;
use crate::records::{MetricSample, TelegrafPoint, TopologyDependency, TopologyRequest};

const TOPOLOGY_DEPENDENCY_TYPE: &str = "Http";
const TOPOLOGY_RESULT_CODE: &str = "200";

/// Output of translating one sample.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Translation {
    pub points: Vec<TelegrafPoint>,
    pub requests: Vec<TopologyRequest>,
    pub dependencies: Vec<TopologyDependency>,
}

impl Translation {
    pub fn extend(&mut self, other: Translation) {
        self.points.extend(other.points);
        self.requests.extend(other.requests);
        self.dependencies.extend(other.dependencies);
    }
}

/// Translates metric samples for one cluster and host.
#[derive(Debug, Clone)]
pub struct Translator {
    cluster_id: String,
    cluster_name: String,
    computer: String,
    allow_partial_topology: bool,
}

/// RFC 3339 UTC rendering of a Unix timestamp, second precision.
pub fn format_unix_seconds(timestamp: u64) -> Result<String, TranslateError> {
    let secs = i64::try_from(timestamp).map_err(|_| TranslateError::Timestamp(timestamp))?;
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or(TranslateError::Timestamp(timestamp))
}

impl Translator {
    #[must_use]
    pub fn new(
        cluster_id: String,
        cluster_name: String,
        computer: String,
        allow_partial_topology: bool,
    ) -> Self {
        Translator {
            cluster_id,
            cluster_name,
            computer,
            allow_partial_topology,
        }
    }

    /// One point per numeric or boolean field; other field types are skipped.
    pub fn translate(&self, sample: &MetricSample) -> Result<Translation, TranslateError> {
        let cluster_id_tag = format!("{TELEGRAF_METRIC_ORIGIN_PREFIX}/{TELEGRAF_TAG_CLUSTER_ID}");
        let cluster_name_tag =
            format!("{TELEGRAF_METRIC_ORIGIN_PREFIX}/{TELEGRAF_TAG_CLUSTER_NAME}");
        let mut tags: BTreeMap<&str, &str> = sample
            .tags
            .iter()
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        tags.insert(&cluster_id_tag, &self.cluster_id);
        tags.insert(&cluster_name_tag, &self.cluster_name);
        let tag_json = serde_json::to_string(&tags)?;

        let collection_time = format_unix_seconds(sample.timestamp)?;
        let origin = format!("{TELEGRAF_METRIC_ORIGIN_PREFIX}/{TELEGRAF_METRIC_ORIGIN_SUFFIX}");

        let mut translation = Translation::default();
        for (field, value) in &sample.fields {
            let Some(value) = value.as_f64() else {
                debug!("METRICS | Dropping non-numeric field {} of {}", field, sample.name);
                continue;
            };

            translation.points.push(TelegrafPoint {
                origin: origin.clone(),
                namespace: sample.name.clone(),
                name: field.clone(),
                value,
                tags: tag_json.clone(),
                collection_time: collection_time.clone(),
                computer: self.computer.clone(),
            });

            if field == TOPOLOGY_TRIGGER_FIELD
                && sample.name.starts_with(TOPOLOGY_NAMESPACE_PREFIX)
                && value > 0.0
            {
                if let Some((request, dependency)) =
                    self.topology_pair(sample, value, &collection_time)
                {
                    translation.requests.push(request);
                    translation.dependencies.push(dependency);
                }
            }
        }
        Ok(translation)
    }

    fn topology_pair(
        &self,
        sample: &MetricSample,
        value: f64,
        time: &str,
    ) -> Option<(TopologyRequest, TopologyDependency)> {
        let source = sample.tags.get(TOPOLOGY_SOURCE_APP_TAG);
        let destination = sample.tags.get(TOPOLOGY_DESTINATION_APP_TAG);
        if source.is_none() || destination.is_none() {
            if !self.allow_partial_topology {
                warn!(
                    "METRICS | Skipping topology pair for {}: missing {} or {} tag",
                    sample.name, TOPOLOGY_SOURCE_APP_TAG, TOPOLOGY_DESTINATION_APP_TAG
                );
                return None;
            }
            debug!("METRICS | Emitting partial topology pair for {}", sample.name);
        }
        let source = source.cloned().unwrap_or_default();
        let destination = destination.cloned().unwrap_or_default();

        let operation_id = Uuid::new_v4().to_string();
        let dependency_id = Uuid::new_v4().to_string();
        let item_count = value.round() as i64;

        let request = TopologyRequest {
            time: time.to_string(),
            id: Uuid::new_v4().to_string(),
            operation_id: operation_id.clone(),
            parent_id: dependency_id.clone(),
            name: destination.clone(),
            app_role_name: destination.clone(),
            success: true,
            result_code: TOPOLOGY_RESULT_CODE.to_string(),
            duration_ms: 0.0,
            item_count,
        };
        let dependency = TopologyDependency {
            time: time.to_string(),
            id: dependency_id,
            operation_id,
            target: destination.clone(),
            name: destination,
            dependency_type: TOPOLOGY_DEPENDENCY_TYPE.to_string(),
            app_role_name: source,
            success: true,
            result_code: TOPOLOGY_RESULT_CODE.to_string(),
            duration_ms: 0.0,
            item_count,
        };
        Some((request, dependency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::FieldValue;
    use std::collections::HashMap;

    fn translator(allow_partial: bool) -> Translator {
        Translator::new(
            "/subscriptions/s/managedClusters/c1".to_string(),
            "c1".to_string(),
            "node-1".to_string(),
            allow_partial,
        )
    }

    fn osm_sample(value: FieldValue, with_tags: bool) -> MetricSample {
        let mut tags = HashMap::new();
        if with_tags {
            tags.insert("app".to_string(), "frontend".to_string());
            tags.insert("envoy_cluster_name".to_string(), "backend".to_string());
        }
        let mut fields = BTreeMap::new();
        fields.insert(TOPOLOGY_TRIGGER_FIELD.to_string(), value);
        MetricSample {
            name: "container.azm.ms.osm".to_string(),
            tags,
            fields,
            timestamp: 1_600_000_000,
        }
    }

    #[test]
    fn test_translate_drops_non_numeric() {
        let mut fields = BTreeMap::new();
        fields.insert("usage_active".to_string(), FieldValue::Float(55.5));
        fields.insert("label".to_string(), FieldValue::Str("x".to_string()));
        let sample = MetricSample {
            name: "cpu".to_string(),
            tags: HashMap::from([("cpu".to_string(), "cpu-total".to_string())]),
            fields,
            timestamp: 1_600_000_000,
        };

        let translation = translator(true).translate(&sample).expect("translate");
        assert_eq!(translation.points.len(), 1);
        let point = &translation.points[0];
        assert_eq!(point.value, 55.5);
        assert_eq!(point.name, "usage_active");
        assert_eq!(point.namespace, "cpu");
        assert_eq!(point.origin, "container.azm.ms/telegraf");
        assert_eq!(point.collection_time, "2020-09-13T12:26:40Z");
        assert_eq!(point.computer, "node-1");
        assert!(translation.requests.is_empty());

        let tags: HashMap<String, String> = serde_json::from_str(&point.tags).expect("tags");
        assert_eq!(tags.get("cpu").map(String::as_str), Some("cpu-total"));
        assert_eq!(
            tags.get("container.azm.ms/clusterName").map(String::as_str),
            Some("c1")
        );
        assert_eq!(
            tags.get("container.azm.ms/clusterId").map(String::as_str),
            Some("/subscriptions/s/managedClusters/c1")
        );
    }

    #[test]
    fn test_boolean_fields_convert() {
        let mut fields = BTreeMap::new();
        fields.insert("up".to_string(), FieldValue::Bool(true));
        fields.insert("down".to_string(), FieldValue::Bool(false));
        let sample = MetricSample {
            name: "health".to_string(),
            fields,
            timestamp: 0,
            ..MetricSample::default()
        };
        let translation = translator(true).translate(&sample).expect("translate");
        let values: Vec<(String, f64)> = translation
            .points
            .iter()
            .map(|p| (p.name.clone(), p.value))
            .collect();
        assert_eq!(
            values,
            vec![("down".to_string(), 0.0), ("up".to_string(), 1.0)]
        );
        assert_eq!(translation.points[0].collection_time, "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_out_of_range_timestamp() {
        let sample = MetricSample {
            name: "cpu".to_string(),
            timestamp: u64::MAX,
            ..MetricSample::default()
        };
        assert!(matches!(
            translator(true).translate(&sample),
            Err(TranslateError::Timestamp(_))
        ));
    }

    #[test]
    fn test_topology_not_triggered_for_zero() {
        let translation = translator(true)
            .translate(&osm_sample(FieldValue::Int(0), true))
            .expect("translate");
        assert_eq!(translation.points.len(), 1);
        assert!(translation.requests.is_empty());
        assert!(translation.dependencies.is_empty());
    }

    #[test]
    fn test_topology_pair_is_correlated() {
        let translation = translator(true)
            .translate(&osm_sample(FieldValue::Float(3.0), true))
            .expect("translate");
        assert_eq!(translation.requests.len(), 1);
        assert_eq!(translation.dependencies.len(), 1);
        let request = &translation.requests[0];
        let dependency = &translation.dependencies[0];
        assert_eq!(request.operation_id, dependency.operation_id);
        assert_eq!(request.parent_id, dependency.id);
        assert_eq!(request.app_role_name, "backend");
        assert_eq!(dependency.target, "backend");
        assert_eq!(dependency.app_role_name, "frontend");
        assert_eq!(request.item_count, 3);

        let json = serde_json::to_value(request).expect("json");
        assert_eq!(json["time"], "2020-09-13T12:26:40Z");
        assert!(json.get("OperationId").is_some());
    }

    #[test]
    fn test_topology_requires_namespace_prefix() {
        let mut sample = osm_sample(FieldValue::Int(5), true);
        sample.name = "envoy".to_string();
        let translation = translator(true).translate(&sample).expect("translate");
        assert!(translation.requests.is_empty());
    }

    #[test]
    fn test_partial_topology_policy() {
        let tolerant = translator(true)
            .translate(&osm_sample(FieldValue::Int(1), false))
            .expect("translate");
        assert_eq!(tolerant.requests.len(), 1);
        assert_eq!(tolerant.dependencies.len(), 1);
        assert_eq!(tolerant.dependencies[0].app_role_name, "");

        let strict = translator(false)
            .translate(&osm_sample(FieldValue::Int(1), false))
            .expect("translate");
        assert_eq!(strict.points.len(), 1);
        assert!(strict.requests.is_empty());
        assert!(strict.dependencies.is_empty());
    }
}
