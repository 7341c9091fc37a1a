//! Remote dispatch boundary.

use crate::{DispatchError, DispatchResult};
use action_queue_store::{ActionKind, QueuedAction};
use async_trait::async_trait;
use network_quality_monitor::{AdaptiveParameters, PayloadQuality};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Fidelity hints passed along with every dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchContext {
    pub payload_quality: PayloadQuality,
    pub image_quality: u8,
    pub max_video_resolution: u32,
    #[serde(skip)]
    pub timeout: Duration,
}

impl From<&AdaptiveParameters> for DispatchContext {
    fn from(params: &AdaptiveParameters) -> Self {
        Self {
            payload_quality: params.payload_quality,
            image_quality: params.image_quality,
            max_video_resolution: params.max_video_resolution,
            timeout: params.dispatch_timeout,
        }
    }
}

/// Sends one action to the remote.
#[async_trait]
pub trait RemoteDispatcher: Send + Sync {
    async fn send(&self, action: &QueuedAction, ctx: &DispatchContext) -> DispatchResult<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DispatchRequest<'a> {
    action_id: &'a str,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    attempt: u32,
    payload: &'a serde_json::Value,
    quality: &'a DispatchContext,
}

/// HTTP dispatcher posting each action as JSON.
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn endpoint(&self, kind: ActionKind) -> String {
        let path = match kind {
            ActionKind::Message => "messages",
            ActionKind::FileUpload => "uploads",
            ActionKind::ApiCall => "actions",
        };
        format!("{}/{}", self.base_url, path)
    }
}

/// Map an HTTP status to a dispatch result.
pub fn classify_status(status: StatusCode, body: &str) -> DispatchResult<()> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("HTTP {}: {}", status.as_u16(), body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Err(DispatchError::Transient(message))
    } else {
        Err(DispatchError::Permanent(message))
    }
}

fn classify_transport_error(err: reqwest::Error) -> DispatchError {
    if err.is_builder() {
        DispatchError::Permanent(err.to_string())
    } else {
        DispatchError::Transient(err.to_string())
    }
}

#[async_trait]
impl RemoteDispatcher for HttpDispatcher {
    async fn send(&self, action: &QueuedAction, ctx: &DispatchContext) -> DispatchResult<()> {
        let url = self.endpoint(action.kind);
        let request = DispatchRequest {
            action_id: action.id.as_str(),
            kind: action.kind.as_str(),
            target: action.target.as_deref(),
            attempt: action.attempt,
            payload: &action.payload,
            quality: ctx,
        };

        debug!(url = %url, action_id = %action.id, attempt = action.attempt, "Dispatching action");

        let mut builder = self
            .client
            .post(&url)
            .header("Idempotency-Key", action.id.as_str())
            .timeout(ctx.timeout)
            .json(&request);
        if let Some(token) = &self.auth_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}
