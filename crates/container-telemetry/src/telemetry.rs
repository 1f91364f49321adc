// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exception and event telemetry hooks.
//!
//! Embedders implement [`TelemetrySink`] to forward operationally significant
//! failures and lifecycle events to an external telemetry service. The default
//! [`LogTelemetrySink`] only writes them to the local log.

use std::collections::BTreeMap;

use tracing::{error, info};

/// Receiver of exception and custom event telemetry.
pub trait TelemetrySink: Send + Sync {
    /// Called for failures worth surfacing outside the node.
    fn send_exception(&self, message: &str);
    /// Called for named lifecycle events with string dimensions.
    fn send_event(&self, name: &str, dimensions: &BTreeMap<String, String>);
}

/// Sink that writes telemetry to the local log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetrySink;

impl TelemetrySink for LogTelemetrySink {
    fn send_exception(&self, message: &str) {
        error!("TELEMETRY | exception: {}", message);
    }

    fn send_event(&self, name: &str, dimensions: &BTreeMap<String, String>) {
        info!("TELEMETRY | event {} {:?}", name, dimensions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_log_sink_writes_exception() {
        LogTelemetrySink.send_exception("boom");
        assert!(logs_contain("TELEMETRY | exception: boom"));
    }

    #[test]
    #[traced_test]
    fn test_log_sink_writes_event() {
        let mut dimensions = BTreeMap::new();
        dimensions.insert("ConfigErrorEventCount".to_string(), "2".to_string());
        LogTelemetrySink.send_event("KubeMonAgentEventsFlushed", &dimensions);
        assert!(logs_contain("KubeMonAgentEventsFlushed"));
        assert!(logs_contain("ConfigErrorEventCount"));
    }
}
