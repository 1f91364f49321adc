// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line-delimited JSON protocol between the collection runtime and the agent.
//!
//! Each input line is one batch:
//!
//! ```text
//! {"kind":"logs","records":[{"filepath":"...","stream":"stdout","log":"...","time":"..."}]}
//! {"kind":"metrics","samples":[{"name":"cpu","tags":{},"fields":{"usage":1.5},"timestamp":1600000000}]}
//! {"kind":"errors","records":[...]}
//! ```
//!
//! and is answered with one line carrying the host return code,
//! `{"code":1}` (accepted) or `{"code":2}` (retry).

use container_telemetry::records::{MetricSample, RawLogRecord};
use container_telemetry::{DeliveryEngine, DeliveryResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostBatch {
    Logs { records: Vec<RawLogRecord> },
    Metrics { samples: Vec<MetricSample> },
    Errors { records: Vec<RawLogRecord> },
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HostReply {
    pub code: i32,
}

impl From<DeliveryResult> for HostReply {
    fn from(result: DeliveryResult) -> Self {
        HostReply {
            code: result.as_code(),
        }
    }
}

/// Decodes one input line and hands the batch to the engine.
///
/// A line that cannot be decoded is answered as accepted; redelivering it
/// would fail the same way.
pub async fn handle_line(engine: &DeliveryEngine, line: &str) -> HostReply {
    let batch: HostBatch = match serde_json::from_str(line) {
        Ok(batch) => batch,
        Err(e) => {
            warn!("HOST | Dropping undecodable batch: {}", e);
            return DeliveryResult::Accepted.into();
        }
    };
    let result = match batch {
        HostBatch::Logs { records } => engine.deliver_logs(&records).await,
        HostBatch::Metrics { samples } => engine.deliver_metrics(&samples).await,
        HostBatch::Errors { records } => engine.deliver_error_lines(&records),
    };
    result.into()
}

/// Answers every input batch on `output` until `input` is closed or the
/// reply channel breaks.
pub async fn serve<R, W>(engine: &DeliveryEngine, input: R, mut output: W)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                error!("HOST | Error reading input: {e}");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(engine, &line).await;
        let mut out = match serde_json::to_vec(&reply) {
            Ok(out) => out,
            Err(e) => {
                error!("HOST | Error encoding reply: {e}");
                continue;
            }
        };
        out.push(b'\n');
        if let Err(e) = output.write_all(&out).await {
            error!("HOST | Error writing reply: {e}");
            return;
        }
        if let Err(e) = output.flush().await {
            error!("HOST | Error flushing reply: {e}");
            return;
        }
    }
}
