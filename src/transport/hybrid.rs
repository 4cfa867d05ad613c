//! Hybrid transport: calls over HTTP, events over an event-only WebSocket

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use super::push::session_from_handshake;
use super::{websocket_url, CallContext, EventStream, PollTransport, PushTransport, Transport, TransportMode};
use crate::error::{Error, Result};
use crate::protocol::{ApiReply, Procedure};

/// Gateway route pushing both chat messages and domain events
const EVENT_ROUTE: &str = "all";

/// Poll for calls, push for events
pub struct HybridTransport {
    poll: PollTransport,
    verify_key: SecretString,
    reserved_sync_id: i64,
    call_timeout: Duration,
    events: Mutex<Option<PushTransport>>,
}

impl HybridTransport {
    /// Wrap a poll transport; the event channel opens on first subscribe
    pub fn new(
        poll: PollTransport,
        verify_key: SecretString,
        reserved_sync_id: i64,
        call_timeout: Duration,
    ) -> Self {
        HybridTransport {
            poll,
            verify_key,
            reserved_sync_id,
            call_timeout,
            events: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for HybridTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Hybrid
    }

    async fn call(
        &self,
        context: &CallContext,
        procedure: &Procedure,
        payload: Value,
    ) -> Result<ApiReply<Value>> {
        self.poll.call(context, procedure, payload).await
    }

    async fn subscribe(&self, context: &CallContext) -> Result<Option<EventStream>> {
        let session_key = context
            .session_key
            .clone()
            .ok_or_else(|| Error::InvalidState("event channel needs a session".into()))?;

        let mut events = self.events.lock().await;
        if events.is_some() {
            return Err(Error::InvalidState("event channel already open".into()));
        }

        let url = websocket_url(
            self.poll.endpoint(),
            EVENT_ROUTE,
            &[
                ("verifyKey", self.verify_key.expose_secret().to_string()),
                ("sessionKey", session_key),
                ("qq", context.account_id.to_string()),
            ],
        )?;
        let push = PushTransport::new(self.reserved_sync_id, self.call_timeout);
        let handshake = push.open(&url).await?;
        session_from_handshake(&handshake)?;
        info!(account = context.account_id, "Event channel open");

        let stream = push.subscribe(context).await?;
        *events = Some(push);
        Ok(stream)
    }

    async fn close(&self) {
        if let Some(push) = self.events.lock().await.take() {
            push.shutdown();
        }
    }
}
