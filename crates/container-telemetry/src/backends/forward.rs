// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming socket backend speaking the msgpack forward protocol.
//!
//! A frame is `[tag, [[time, {k: v}], ...]]`. The exact frame size is computed
//! up front so the output buffer is allocated once.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::LogBackend;
use crate::constants::{FORWARD_SOURCE_NAME, SOCKET_WRITE_DEADLINE};
use crate::errors::{DeliveryError, EncodeError};
use crate::records::EnrichedLogRecord;

#[cfg(unix)]
type Connection = tokio::net::UnixStream;
#[cfg(not(unix))]
type Connection = tokio::io::DuplexStream;

/// Marker (fixint int64) plus eight payload bytes.
const INT64_SIZE: usize = 9;

fn str_size(len: usize) -> Result<usize, EncodeError> {
    let header = match len {
        0..=31 => 1,
        32..=255 => 2,
        256..=65_535 => 3,
        _ if u32::try_from(len).is_ok() => 5,
        _ => return Err(EncodeError::TooLarge(len)),
    };
    Ok(header + len)
}

fn container_header_size(len: usize) -> Result<usize, EncodeError> {
    match len {
        0..=15 => Ok(1),
        16..=65_535 => Ok(3),
        _ if u32::try_from(len).is_ok() => Ok(5),
        _ => Err(EncodeError::TooLarge(len)),
    }
}

fn map_size(record: &BTreeMap<String, String>) -> Result<usize, EncodeError> {
    let mut size = container_header_size(record.len())?;
    for (k, v) in record {
        size += str_size(k.len())? + str_size(v.len())?;
    }
    Ok(size)
}

/// Exact encoded size of a forward frame.
pub fn forward_frame_size(
    tag: &str,
    entries: &[BTreeMap<String, String>],
) -> Result<usize, EncodeError> {
    let mut size = 1 + str_size(tag.len())? + container_header_size(entries.len())?;
    for entry in entries {
        size += 1 + INT64_SIZE + map_size(entry)?;
    }
    Ok(size)
}

fn len_u32(len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::TooLarge(len))
}

/// Encodes `entries` as one forward-mode frame stamped with `time`.
pub fn encode_forward_frame(
    tag: &str,
    entries: &[BTreeMap<String, String>],
    time: i64,
) -> Result<Vec<u8>, EncodeError> {
    let write_err = |e: rmp::encode::ValueWriteError| EncodeError::Write(e.to_string());

    let size = forward_frame_size(tag, entries)?;
    let mut buf = Vec::with_capacity(size);

    rmp::encode::write_array_len(&mut buf, 2).map_err(write_err)?;
    rmp::encode::write_str(&mut buf, tag).map_err(write_err)?;
    rmp::encode::write_array_len(&mut buf, len_u32(entries.len())?).map_err(write_err)?;
    for entry in entries {
        rmp::encode::write_array_len(&mut buf, 2).map_err(write_err)?;
        rmp::encode::write_i64(&mut buf, time).map_err(write_err)?;
        rmp::encode::write_map_len(&mut buf, len_u32(entry.len())?).map_err(write_err)?;
        for (k, v) in entry {
            rmp::encode::write_str(&mut buf, k).map_err(write_err)?;
            rmp::encode::write_str(&mut buf, v).map_err(write_err)?;
        }
    }
    debug_assert_eq!(buf.len(), size);
    Ok(buf)
}

/// Persistent local socket connection, lazily (re)established.
pub struct ForwardBackend {
    path: PathBuf,
    write_deadline: Duration,
    connection: Mutex<Option<Connection>>,
}

impl ForwardBackend {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        ForwardBackend {
            path,
            write_deadline: SOCKET_WRITE_DEADLINE,
            connection: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_write_deadline(mut self, deadline: Duration) -> Self {
        self.write_deadline = deadline;
        self
    }

    #[cfg(unix)]
    async fn connect(&self) -> io::Result<Connection> {
        tokio::net::UnixStream::connect(&self.path).await
    }

    #[cfg(not(unix))]
    async fn connect(&self) -> io::Result<Connection> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not available on this platform",
        ))
    }

    /// Opens the connection ahead of the first batch. Failure is not fatal;
    /// the next send retries.
    pub async fn warm_up(&self) {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return;
        }
        match self.connect().await {
            Ok(stream) => {
                info!("SOCKET | Connected to {}", self.path.display());
                *connection = Some(stream);
            }
            Err(e) => error!(
                "SOCKET | Unable to connect to {}: {}",
                self.path.display(),
                e
            ),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }
}

#[async_trait]
impl LogBackend for ForwardBackend {
    fn name(&self) -> &'static str {
        "streaming-socket"
    }

    async fn send(&self, records: &[EnrichedLogRecord]) -> Result<usize, DeliveryError> {
        if records.is_empty() {
            return Ok(0);
        }
        let entries: Vec<BTreeMap<String, String>> = records
            .iter()
            .map(EnrichedLogRecord::to_forward_record)
            .collect();
        let batch_time = chrono::Utc::now().timestamp();
        let frame = encode_forward_frame(FORWARD_SOURCE_NAME, &entries, batch_time)
            .map_err(|e| DeliveryError::Payload(e.to_string()))?;

        // frames from concurrent batches must not interleave on the stream
        let mut connection = self.connection.lock().await;
        if connection.is_none() {
            debug!("SOCKET | Connection does not exist, re-connecting");
            let stream = self.connect().await.map_err(|e| {
                error!(
                    "SOCKET | Unable to connect to {}: {}",
                    self.path.display(),
                    e
                );
                DeliveryError::SocketConnect(e)
            })?;
            *connection = Some(stream);
        }
        let Some(stream) = connection.as_mut() else {
            return Err(DeliveryError::SocketConnect(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection missing after connect",
            )));
        };

        let start = Instant::now();
        let result = match tokio::time::timeout(self.write_deadline, stream.write_all(&frame)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write exceeded {:?}", self.write_deadline),
            )),
        };

        match result {
            Ok(()) => {
                debug!(
                    "SOCKET | Flushed {} records ({} bytes) in {} ms",
                    entries.len(),
                    frame.len(),
                    start.elapsed().as_millis()
                );
                Ok(entries.len())
            }
            Err(e) => {
                error!(
                    "SOCKET | Failed to write {} records after {} ms, will retry: {}",
                    entries.len(),
                    start.elapsed().as_millis(),
                    e
                );
                // dropping the stream closes it; the next batch reconnects
                *connection = None;
                Err(DeliveryError::SocketWrite(e))
            }
        }
    }
}
