//! Poll transport: one HTTP request per call

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{normalize_endpoint, with_session_key, CallContext, EventStream, Transport, TransportMode};
use crate::error::{Error, Result};
use crate::protocol::{unwrap_envelope, ApiReply, HttpMethod, Procedure};

/// HTTP request/response transport
#[derive(Clone)]
pub struct PollTransport {
    /// HTTP client
    client: Client,
    /// Gateway base URL, always ending in `/`
    endpoint: Url,
}

impl PollTransport {
    /// Create a poll transport for a gateway endpoint
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(PollTransport {
            client,
            endpoint: normalize_endpoint(endpoint),
        })
    }

    /// Gateway base URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url_for(&self, procedure: &Procedure, context: &CallContext) -> Result<Url> {
        let path = procedure.http_path(&context.version);
        Ok(self.endpoint.join(path.trim_start_matches('/'))?)
    }
}

/// Flatten an object payload into query pairs
fn query_pairs(payload: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = payload else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect()
}

async fn exchange(request: reqwest::RequestBuilder) -> reqwest::Result<Value> {
    request.send().await?.error_for_status()?.json().await
}

#[async_trait]
impl Transport for PollTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Poll
    }

    async fn call(
        &self,
        context: &CallContext,
        procedure: &Procedure,
        payload: Value,
    ) -> Result<ApiReply<Value>> {
        let url = self.url_for(procedure, context)?;
        let payload = with_session_key(payload, context);
        debug!(procedure = %procedure, url = %url, "poll call");

        let request = match procedure.method() {
            HttpMethod::Get => self.client.get(url).query(&query_pairs(&payload)),
            HttpMethod::Post => self.client.post(url).json(&payload),
        };
        let body = exchange(request).await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{} got no reply: {}", procedure, e))
            } else {
                Error::Http(e)
            }
        })?;

        Ok(unwrap_envelope(body))
    }

    async fn subscribe(&self, _context: &CallContext) -> Result<Option<EventStream>> {
        Ok(None)
    }
}
