// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Running delivery counters read by an external metrics emitter.

use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct CounterState {
    log_records_sent: u64,
    log_bytes_sent: u64,
    log_flush_time_ms: u64,
    log_send_errors: u64,
    log_send_429_errors: u64,
    metrics_sent: u64,
    metrics_send_errors: u64,
    metrics_send_429_errors: u64,
    socket_connect_errors: u64,
    socket_send_errors: u64,
    ingest_client_errors: u64,
    ingest_send_errors: u64,
    max_latency_ms: f64,
    max_latency_container: String,
}

/// Monotonic counters shared by every delivery call.
///
/// All updates happen in one short critical section after the network call
/// has completed.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    state: Mutex<CounterState>,
}

/// Outcome of a successful log batch, folded into the counters at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogBatchStats {
    pub records: u64,
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub max_latency_ms: f64,
    pub max_latency_container: String,
}

impl DeliveryCounters {
    fn update<F: FnOnce(&mut CounterState)>(&self, f: F) {
        match self.state.lock() {
            Ok(mut state) => f(&mut *state),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }

    pub fn record_log_batch(&self, stats: &LogBatchStats) {
        if stats.records == 0 {
            return;
        }
        self.update(|s| {
            s.log_records_sent += stats.records;
            s.log_bytes_sent += stats.bytes;
            s.log_flush_time_ms += stats.elapsed_ms;
            if stats.max_latency_ms >= s.max_latency_ms {
                s.max_latency_ms = stats.max_latency_ms;
                s.max_latency_container = stats.max_latency_container.clone();
            }
        });
    }

    pub fn record_log_send_error(&self, throttled: bool) {
        self.update(|s| {
            s.log_send_errors += 1;
            if throttled {
                s.log_send_429_errors += 1;
            }
        });
    }

    pub fn record_metrics_sent(&self, count: u64) {
        self.update(|s| s.metrics_sent += count);
    }

    pub fn record_metrics_send_error(&self, throttled: bool) {
        self.update(|s| {
            s.metrics_send_errors += 1;
            if throttled {
                s.metrics_send_429_errors += 1;
            }
        });
    }

    pub fn record_socket_connect_error(&self) {
        self.update(|s| s.socket_connect_errors += 1);
    }

    pub fn record_socket_send_error(&self) {
        self.update(|s| s.socket_send_errors += 1);
    }

    pub fn record_ingest_client_error(&self) {
        self.update(|s| s.ingest_client_errors += 1);
    }

    pub fn record_ingest_send_error(&self) {
        self.update(|s| s.ingest_send_errors += 1);
    }

    /// Captures a point-in-time snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        let read = |s: &CounterState| CountersSnapshot {
            log_records_sent: s.log_records_sent,
            log_bytes_sent: s.log_bytes_sent,
            log_flush_time_ms: s.log_flush_time_ms,
            log_send_errors: s.log_send_errors,
            log_send_429_errors: s.log_send_429_errors,
            metrics_sent: s.metrics_sent,
            metrics_send_errors: s.metrics_send_errors,
            metrics_send_429_errors: s.metrics_send_429_errors,
            socket_connect_errors: s.socket_connect_errors,
            socket_send_errors: s.socket_send_errors,
            ingest_client_errors: s.ingest_client_errors,
            ingest_send_errors: s.ingest_send_errors,
            max_latency_ms: s.max_latency_ms,
            max_latency_container: s.max_latency_container.clone(),
        };
        match self.state.lock() {
            Ok(state) => read(&*state),
            Err(poisoned) => read(&*poisoned.into_inner()),
        }
    }
}

/// Immutable copy of [`DeliveryCounters`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountersSnapshot {
    pub log_records_sent: u64,
    pub log_bytes_sent: u64,
    pub log_flush_time_ms: u64,
    pub log_send_errors: u64,
    pub log_send_429_errors: u64,
    pub metrics_sent: u64,
    pub metrics_send_errors: u64,
    pub metrics_send_429_errors: u64,
    pub socket_connect_errors: u64,
    pub socket_send_errors: u64,
    pub ingest_client_errors: u64,
    pub ingest_send_errors: u64,
    pub max_latency_ms: f64,
    pub max_latency_container: String,
}

impl fmt::Display for CountersSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "logs_sent={} log_bytes={} log_flush_ms={} log_errors={} log_429={} \
             metrics_sent={} metrics_errors={} metrics_429={} socket_connect_errors={} \
             socket_send_errors={} ingest_client_errors={} ingest_send_errors={} \
             max_latency_ms={} max_latency_container={}",
            self.log_records_sent,
            self.log_bytes_sent,
            self.log_flush_time_ms,
            self.log_send_errors,
            self.log_send_429_errors,
            self.metrics_sent,
            self.metrics_send_errors,
            self.metrics_send_429_errors,
            self.socket_connect_errors,
            self.socket_send_errors,
            self.ingest_client_errors,
            self.ingest_send_errors,
            self.max_latency_ms,
            self.max_latency_container,
        )
    }
}
