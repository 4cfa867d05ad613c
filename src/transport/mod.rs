//! Transport - one request/response primitive over several channels
//!
//! ## Architecture
//!
//! ```text
//!                 Transport::call(context, procedure, payload)
//!                                    │
//!          ┌─────────────────────────┼──────────────────────────┐
//!          ▼                         ▼                          ▼
//!   ┌─────────────┐         ┌─────────────────┐        ┌─────────────────┐
//!   │    Poll     │         │      Push       │        │     Hybrid      │
//!   │ HTTP/call   │         │ one WebSocket,  │        │ calls via Poll, │
//!   │             │         │ syncId replies  │        │ events via Push │
//!   └─────────────┘         └─────────────────┘        └─────────────────┘
//! ```
//!
//! The implementation is chosen once when the bot is built. Replies are
//! unwrapped with [`unwrap_envelope`](crate::protocol::unwrap_envelope);
//! gateway rejections come back as values, channel failures as errors.

mod hybrid;
mod poll;
mod push;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{ApiReply, Procedure, ProtocolVersion};

pub use hybrid::HybridTransport;
pub use poll::PollTransport;
pub use push::{PushTransport, DEFAULT_RESERVED_SYNC_ID};

pub(crate) use push::session_from_handshake;

/// Inbound server pushes, one JSON payload per event
pub type EventStream = mpsc::UnboundedReceiver<Value>;

/// How the bot talks to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// HTTP calls, events fetched by a poll loop
    #[default]
    Poll,
    /// Everything over one WebSocket
    Push,
    /// HTTP calls, events pushed over a WebSocket
    Hybrid,
}

impl std::str::FromStr for TransportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "poll" | "http" => Ok(TransportMode::Poll),
            "push" | "ws" | "websocket" => Ok(TransportMode::Push),
            "hybrid" => Ok(TransportMode::Hybrid),
            _ => Err(Error::Config(format!(
                "Invalid transport mode: {}. Valid options: poll, push, hybrid",
                s
            ))),
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Poll => write!(f, "poll"),
            TransportMode::Push => write!(f, "push"),
            TransportMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Immutable snapshot of the session handed to every outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Session token, absent until authentication succeeds
    pub session_key: Option<String>,
    /// Bot account
    pub account_id: i64,
    /// Gateway protocol version
    pub version: ProtocolVersion,
}

impl CallContext {
    /// Context for calls issued before a session exists
    pub fn anonymous(account_id: i64, version: ProtocolVersion) -> Self {
        CallContext {
            session_key: None,
            account_id,
            version,
        }
    }
}

/// A request/response channel to the gateway
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which channel this is
    fn mode(&self) -> TransportMode;

    /// Issue one call and wait for its reply
    async fn call(
        &self,
        context: &CallContext,
        procedure: &Procedure,
        payload: Value,
    ) -> Result<ApiReply<Value>>;

    /// Open the server-push stream
    ///
    /// `None` means this transport has no push channel and events must be
    /// fetched by polling.
    async fn subscribe(&self, context: &CallContext) -> Result<Option<EventStream>>;

    /// Tear down any open channel
    async fn close(&self) {}
}

/// Merge the session token into an object payload
pub(crate) fn with_session_key(payload: Value, context: &CallContext) -> Value {
    match (payload, &context.session_key) {
        (Value::Object(mut map), Some(key)) => {
            map.entry("sessionKey")
                .or_insert_with(|| Value::String(key.clone()));
            Value::Object(map)
        }
        (Value::Null, Some(key)) => serde_json::json!({ "sessionKey": key }),
        (payload, _) => payload,
    }
}

/// WebSocket URL for a gateway route, derived from the HTTP endpoint
pub(crate) fn websocket_url(endpoint: &Url, route: &str, params: &[(&str, String)]) -> Result<Url> {
    let mut url = endpoint.join(route.trim_start_matches('/'))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("Cannot derive a WebSocket URL from {}", endpoint)))?;
    if !params.is_empty() {
        let mut query = url.query_pairs_mut();
        for (name, value) in params {
            query.append_pair(name, value);
        }
    }
    Ok(url)
}

/// Endpoint with a trailing slash so relative routes join below it
pub(crate) fn normalize_endpoint(mut endpoint: Url) -> Url {
    if !endpoint.path().ends_with('/') {
        let path = format!("{}/", endpoint.path());
        endpoint.set_path(&path);
    }
    endpoint
}

/// Scripted transport for unit tests
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::unwrap_envelope;

    /// Records every call and answers each with the same reply
    pub(crate) struct RecordingTransport {
        calls: Mutex<Vec<(Procedure, Value)>>,
        reply: Value,
    }

    impl RecordingTransport {
        pub(crate) fn replying(reply: Value) -> std::sync::Arc<Self> {
            std::sync::Arc::new(RecordingTransport {
                calls: Mutex::new(Vec::new()),
                reply,
            })
        }

        /// Calls so far, payloads with the session key merged in
        pub(crate) fn calls(&self) -> Vec<(Procedure, Value)> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn last(&self) -> (Procedure, Value) {
            self.calls().pop().expect("no call recorded")
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn mode(&self) -> TransportMode {
            TransportMode::Poll
        }

        async fn call(
            &self,
            context: &CallContext,
            procedure: &Procedure,
            payload: Value,
        ) -> Result<ApiReply<Value>> {
            self.calls
                .lock()
                .unwrap()
                .push((procedure.clone(), with_session_key(payload, context)));
            Ok(unwrap_envelope(self.reply.clone()))
        }

        async fn subscribe(&self, _context: &CallContext) -> Result<Option<EventStream>> {
            Ok(None)
        }
    }
}
