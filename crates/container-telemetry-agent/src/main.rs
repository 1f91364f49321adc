// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use container_telemetry::config::EngineConfig;
use container_telemetry::constants::FATAL_EXIT_DELAY;
use container_telemetry::DeliveryEngine;

mod host;
mod logger;

const COUNTERS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("AZMON_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=warn,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .event_format(logger::Formatter)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error reading agent configuration: {e}");
            // give external log and telemetry shippers time to pick this up
            tokio::time::sleep(FATAL_EXIT_DELAY).await;
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Starting container telemetry agent {} on {} (route {})",
        config.agent_version,
        config.hostname,
        config.route.name()
    );

    let engine = match DeliveryEngine::builder(config).build() {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("Error creating delivery engine: {e}");
            tokio::time::sleep(FATAL_EXIT_DELAY).await;
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = engine.start().await {
        error!("Error starting delivery engine: {e}");
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    let reporter = tokio::spawn(report_counters(engine.clone(), cancel.clone()));

    tokio::select! {
        () = host::serve(
            &engine,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        ) => info!("Input closed, shutting down"),
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Unable to listen for shutdown signal: {e}");
            }
            info!("Received shutdown signal");
        }
    }

    cancel.cancel();
    if let Err(e) = reporter.await {
        error!("Counter reporter ended abnormally: {e}");
    }
    if let Err(e) = engine.shutdown().await {
        error!("Error shutting down delivery engine: {e}");
    }
    ExitCode::SUCCESS
}

/// Logs the delivery counters periodically for the metrics emitter.
async fn report_counters(engine: Arc<DeliveryEngine>, cancel: CancellationToken) {
    let mut ticker = interval(COUNTERS_REPORT_INTERVAL);
    ticker.tick().await; // discard first tick, which is instantaneous
    loop {
        tokio::select! {
            _ = ticker.tick() => info!("TELEMETRY | {}", engine.counters().snapshot()),
            () = cancel.cancelled() => break,
        }
    }
}
