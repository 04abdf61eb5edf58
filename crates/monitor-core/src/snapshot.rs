//! One-shot REST snapshots of the active-call list
//!
//! The snapshot is the hydration path: it tells a freshly started (or
//! freshly signed-in) monitor which calls are already live, on a cadence
//! independent of the stream. A failed fetch is reported to the caller
//! and never touches existing state.

use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::call::{CallPayload, CallRecord};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};

/// Comma-separated status filter the server treats as "currently active".
const ACTIVE_STATUS_FILTER: &str = "in-progress,queued,ringing";

/// Bearer-authenticated client for the calls REST API.
pub struct SnapshotClient {
    http: reqwest::Client,
    base: Url,
    token: String,
    tenant_id: String,
    user_filter: Option<String>,
}

impl SnapshotClient {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let base = Url::parse(&config.rest_base)
            .map_err(|e| MonitorError::InvalidConfig(format!("rest base url: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: config.token.clone(),
            tenant_id: config.tenant_id.clone(),
            user_filter: config.user_filter.clone(),
        })
    }

    /// Fetch the calls the server currently classifies as active for this
    /// tenant (optionally restricted to one user).
    ///
    /// Records pass through the same normalization as streamed events, so
    /// the caller can hand them straight to the reconciler.
    pub async fn fetch_active_calls(&self) -> Result<Vec<CallRecord>> {
        let mut url = self
            .base
            .join(&format!("api/{}/calls", self.tenant_id))
            .map_err(|e| MonitorError::InvalidConfig(format!("calls url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("status", ACTIVE_STATUS_FILTER);
        if let Some(user_id) = &self.user_filter {
            url.query_pairs_mut().append_pair("user_id", user_id);
        }

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| MonitorError::Network(e.to_string()))?;

        check_status(response.status())?;

        let payloads: Vec<CallPayload> = response
            .json()
            .await
            .map_err(|e| MonitorError::Decode(e.to_string()))?;
        let calls: Vec<CallRecord> = payloads.into_iter().map(CallRecord::from_payload).collect();
        debug!(count = calls.len(), "fetched active-call snapshot");
        Ok(calls)
    }

    /// Fetch the heavy detail fields (transcripts, summary) for one call.
    /// The returned record is flagged `details_loaded`.
    pub async fn fetch_call_details(&self, call_id: &str) -> Result<CallRecord> {
        let url = self
            .base
            .join(&format!("api/calls/{call_id}"))
            .map_err(|e| MonitorError::InvalidConfig(format!("call detail url: {e}")))?;

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| MonitorError::Network(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MonitorError::NotFound(call_id.to_string()));
        }
        check_status(response.status())?;

        let payload: CallPayload = response
            .json()
            .await
            .map_err(|e| MonitorError::Decode(e.to_string()))?;
        let mut record = CallRecord::from_payload(payload);
        record.details_loaded = true;
        Ok(record)
    }
}

fn check_status(status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(MonitorError::AuthExpired);
    }
    if !status.is_success() {
        return Err(MonitorError::Network(format!(
            "snapshot request returned {status}"
        )));
    }
    Ok(())
}
