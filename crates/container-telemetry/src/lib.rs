// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record delivery core for a node-resident container telemetry agent.
//!
//! The collection runtime hands batches of tailed container log lines and
//! metric samples to a [`engine::DeliveryEngine`], which enriches them,
//! translates them into backend wire objects and ships them to exactly one
//! backend. The engine answers every batch with a [`DeliveryResult`] that
//! tells the caller whether it may discard the batch or must redeliver it.
//!
//! ```text
//!   collection runtime
//!          │ deliver_logs / deliver_metrics
//!          v
//!   ┌──────────────┐   snapshot   ┌──────────────────┐
//!   │  enrichment  │ <─────────── │  metadata cache  │ <── refresh loop
//!   │ / translator │              └──────────────────┘
//!   └──────┬───────┘
//!          v
//!   ┌──────────────┐     batch HTTP | streaming socket | columnar
//!   │    router    │ ──────────────────────────────────────────────>
//!   └──────┬───────┘
//!          v
//!   Accepted / Retry                 error events ── flush loop ──> batch HTTP
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backends;
pub mod config;
pub mod constants;
pub mod counters;
pub mod engine;
pub mod error_events;
pub mod errors;
pub mod hostname;
pub mod http;
pub mod metadata_cache;
pub mod orchestrator;
pub mod records;
pub mod telemetry;
pub mod translator;

pub use engine::{DeliveryEngine, DeliveryEngineBuilder};

/// Outcome of a delivery attempt, as seen by the collection runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// The batch was processed and may be discarded by the caller.
    Accepted,
    /// The batch was not delivered and should be handed back later.
    Retry,
}

impl DeliveryResult {
    /// Host runtime return code (`FLB_OK` / `FLB_RETRY`).
    #[must_use]
    pub fn as_code(self) -> i32 {
        match self {
            DeliveryResult::Accepted => constants::FLB_OK,
            DeliveryResult::Retry => constants::FLB_RETRY,
        }
    }

    #[must_use]
    pub fn is_retry(self) -> bool {
        self == DeliveryResult::Retry
    }
}
