// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared reqwest client construction.

use crate::constants::HTTP_TIMEOUT;
use core::time::Duration;
use std::error::Error;
use tracing::error;

/// Creates the HTTP client used by the batch endpoint, the topology upload and
/// the error-event flush.
///
/// An invalid proxy URL is logged and the client is rebuilt without it, so a
/// misconfigured proxy never prevents delivery.
#[must_use]
pub fn get_client(proxy_https: Option<&str>) -> reqwest::Client {
    match build_client(proxy_https) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(None) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(proxy_https: Option<&str>) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(HTTP_TIMEOUT)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(https_uri) = proxy_https {
        let proxy = reqwest::Proxy::https(https_uri)?;
        client = client.proxy(proxy);
    }

    Ok(client.build()?)
}
