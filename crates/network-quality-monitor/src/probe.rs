//! Reachability probes.

use crate::{MonitorError, MonitorResult};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Reachable {
        /// Time until response headers arrived.
        latency: Duration,
        /// Body bytes received.
        bytes: u64,
        /// Time until the whole body arrived.
        elapsed: Duration,
    },
    Unreachable,
}

impl ProbeOutcome {
    /// KB/s of body received; zero when unreachable.
    pub fn throughput_kbps(&self) -> f64 {
        match self {
            Self::Unreachable => 0.0,
            Self::Reachable { bytes, elapsed, .. } => {
                let secs = elapsed.as_secs_f64().max(0.001);
                (*bytes as f64 / 1024.0) / secs
            }
        }
    }
}

/// Something that can measure the link to the remote.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn probe(&self) -> MonitorResult<ProbeOutcome>;
}

/// Fetches a small resource and times it.
pub struct HttpProbe {
    client: Client,
    url: Url,
}

impl HttpProbe {
    pub fn new(url: Url, timeout: Duration) -> MonitorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::Config(format!("failed to build probe client: {}", e)))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Errors that mean "no usable link" rather than a bug in the probe.
fn is_unreachable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

#[async_trait]
impl NetworkProbe for HttpProbe {
    async fn probe(&self) -> MonitorResult<ProbeOutcome> {
        let start = Instant::now();

        let response = match self.client.get(self.url.clone()).send().await {
            Ok(response) => response,
            Err(err) if is_unreachable(&err) => {
                debug!(url = %self.url, error = %err, "Probe target unreachable");
                return Ok(ProbeOutcome::Unreachable);
            }
            Err(err) => return Err(err.into()),
        };
        let latency = start.elapsed();
        let status = response.status();

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) if is_unreachable(&err) => {
                debug!(url = %self.url, error = %err, "Probe body interrupted");
                return Ok(ProbeOutcome::Unreachable);
            }
            Err(err) => return Err(err.into()),
        };
        let elapsed = start.elapsed();

        debug!(
            url = %self.url,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            bytes = body.len(),
            "Probe completed"
        );

        // Any HTTP answer proves reachability, whatever the status.
        Ok(ProbeOutcome::Reachable {
            latency,
            bytes: body.len() as u64,
            elapsed,
        })
    }
}
