//! Client for the OneBot-compatible event feed.
//!
//! Every call is a POST of `{action, params}` against the feed API root,
//! with an optional bearer token. The feed is both the event source
//! (`get_latest_events`) and the reply transport (`send_message`).

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use murmur_core::config::FeedConfig;
use murmur_core::error::{MurmurError, Result};
use murmur_core::types::{InboundEvent, OutboundMessage};

pub struct FeedClient {
    client: reqwest::Client,
    api_url: String,
    access_token: Option<String>,
    long_poll_secs: u64,
}

/// Envelope every feed action answers with.
#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl FeedClient {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            long_poll_secs: config.long_poll_secs,
        }
    }

    /// Pull the next batch of inbound events (long poll).
    ///
    /// The feed is permissive about the payload shape: `data` may be the
    /// event list itself or an object wrapping it under `events`; anything
    /// else yields an empty batch. Individual events that fail to
    /// deserialize are skipped, not errors.
    pub async fn latest_events(&self) -> Result<Vec<InboundEvent>> {
        let params = serde_json::json!({ "timeout": self.long_poll_secs });
        let resp = self.call("get_latest_events", params).await?;
        if resp.status != "ok" {
            return Ok(Vec::new());
        }
        Ok(decode_events(resp.data))
    }

    /// Deliver a reply through the feed.
    pub async fn send_reply(&self, reply: &OutboundMessage) -> Result<()> {
        let params = serde_json::to_value(reply)?;
        let resp = self.call("send_message", params).await?;
        if resp.status != "ok" {
            return Err(MurmurError::Feed(format!(
                "send_message rejected for user {}",
                reply.user_id
            )));
        }
        Ok(())
    }

    /// Identity check used once at startup.
    ///
    /// Failure here is the only fatal error class: it means the event source
    /// itself is unreachable.
    pub async fn self_info(&self) -> Result<serde_json::Value> {
        let resp = self.call("get_self_info", serde_json::json!({})).await?;
        if resp.status != "ok" {
            return Err(MurmurError::Feed(
                "get_self_info did not answer ok".to_string(),
            ));
        }
        Ok(resp.data)
    }

    async fn call(&self, action: &str, params: serde_json::Value) -> Result<ActionResponse> {
        let body = serde_json::json!({ "action": action, "params": params });
        debug!(action, "calling feed API");

        let mut req = self
            .client
            .post(format!("{}/", self.api_url))
            .header("content-type", "application/json")
            .json(&body)
            // Leave headroom beyond the server-side long-poll window.
            .timeout(Duration::from_secs(self.long_poll_secs + 10));
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| MurmurError::Feed(format!("{action}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(MurmurError::Feed(format!(
                "{action} returned {status}: {text}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| MurmurError::Feed(format!("{action}: malformed response: {e}")))
    }
}

/// Accept `data` as a bare event list or as `{"events": [...]}`.
fn decode_events(data: serde_json::Value) -> Vec<InboundEvent> {
    let raw = match data {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("events") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    raw.into_iter()
        .filter_map(|item| match serde_json::from_value::<InboundEvent>(item) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "skipping undecodable event");
                None
            }
        })
        .collect()
}
