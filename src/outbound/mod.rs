//! Outbound envelope: targets, sends, recalls and request responses
//!
//! Every outbound call goes through [`Outbound`], which pairs the transport
//! with a fresh [`CallContext`](crate::transport::CallContext) snapshot.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::MessageChain;
use crate::protocol::{ApiReply, Procedure};
use crate::session::ContextHandle;
use crate::transport::Transport;

/// Where a message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A friend, by account
    Friend(i64),
    /// A group, by id
    Group(i64),
    /// A group member reached through a temporary session
    Temp {
        /// Group the member belongs to
        group: i64,
        /// Member account
        qq: i64,
    },
}

impl Target {
    /// Send procedure for this kind of target
    pub fn send_procedure(&self) -> Procedure {
        match self {
            Target::Friend(_) => Procedure::SendFriendMessage,
            Target::Group(_) => Procedure::SendGroupMessage,
            Target::Temp { .. } => Procedure::SendTempMessage,
        }
    }

    /// Conversation id used by `recall`
    pub fn conversation_id(&self) -> i64 {
        match self {
            Target::Friend(qq) => *qq,
            Target::Group(id) => *id,
            Target::Temp { qq, .. } => *qq,
        }
    }

    fn address(&self, payload: &mut Map<String, Value>) {
        match self {
            Target::Friend(qq) => {
                payload.insert("target".into(), json!(qq));
            }
            Target::Group(id) => {
                payload.insert("target".into(), json!(id));
            }
            Target::Temp { group, qq } => {
                payload.insert("qq".into(), json!(qq));
                payload.insert("group".into(), json!(group));
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Friend(qq) => write!(f, "friend {}", qq),
            Target::Group(id) => write!(f, "group {}", id),
            Target::Temp { group, qq } => write!(f, "member {} of group {}", qq, group),
        }
    }
}

/// Handle for issuing calls on behalf of the session
#[derive(Clone)]
pub struct Outbound {
    transport: Arc<dyn Transport>,
    contexts: ContextHandle,
}

impl Outbound {
    /// Pair a transport with the session's context handle
    pub fn new(transport: Arc<dyn Transport>, contexts: ContextHandle) -> Self {
        Outbound {
            transport,
            contexts,
        }
    }

    /// Read-only session view
    pub fn contexts(&self) -> &ContextHandle {
        &self.contexts
    }

    /// Issue any procedure with the current session context
    pub async fn call(&self, procedure: Procedure, payload: Value) -> Result<ApiReply<Value>> {
        let context = self.contexts.current();
        self.transport.call(&context, &procedure, payload).await
    }

    /// Send a chain, optionally quoting a message by id
    pub async fn send(
        &self,
        target: Target,
        chain: impl Into<MessageChain>,
        quote: Option<i64>,
    ) -> Result<ApiReply<SentMessage>> {
        let chain = chain.into();
        let mut payload = Map::new();
        target.address(&mut payload);
        payload.insert("messageChain".into(), serde_json::to_value(&chain)?);
        if let Some(quote) = quote {
            payload.insert("quote".into(), json!(quote));
        }
        debug!(%target, segments = chain.len(), quote, "sending message");

        let reply = self
            .call(target.send_procedure(), Value::Object(payload))
            .await?;
        Ok(reply.map(|body| SentMessage {
            message_id: body.get("messageId").and_then(Value::as_i64),
            target,
            outbound: self.clone(),
        }))
    }

    /// Send a chain quoting `origin`
    ///
    /// Without a `Source` segment in `origin` there is nothing to quote and
    /// the chain goes out as a plain send.
    pub async fn send_quoted(
        &self,
        target: Target,
        chain: impl Into<MessageChain>,
        origin: &MessageChain,
    ) -> Result<ApiReply<SentMessage>> {
        let quote = origin.source_id();
        if quote.is_none() {
            debug!(%target, "origin has no source id, sending without quote");
        }
        self.send(target, chain, quote).await
    }

    /// Recall a message in a conversation
    pub async fn recall(&self, target: Target, message_id: i64) -> Result<ApiReply<Value>> {
        let version = self.contexts.version();
        let payload = if version.recall_requires_target() {
            json!({ "target": target.conversation_id(), "messageId": message_id })
        } else {
            json!({ "target": message_id })
        };
        debug!(%target, message_id, %version, "recalling message");
        self.call(Procedure::Recall, payload).await
    }

    /// Answer a request event
    pub(crate) async fn respond(
        &self,
        procedure: Procedure,
        request: &crate::event::RequestPayload,
        operate: i64,
        message: &str,
    ) -> Result<ApiReply<Value>> {
        debug!(procedure = %procedure, event_id = request.event_id, operate, "answering request");
        self.call(
            procedure,
            json!({
                "eventId": request.event_id,
                "fromId": request.from_id,
                "groupId": request.group_id,
                "operate": operate,
                "message": message,
            }),
        )
        .await
    }
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound")
            .field("mode", &self.transport.mode())
            .field("account_id", &self.contexts.account_id())
            .finish()
    }
}

/// A message the gateway accepted
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Id assigned by the gateway, when it reported one
    pub message_id: Option<i64>,
    /// Where it went
    pub target: Target,
    outbound: Outbound,
}

impl SentMessage {
    /// Recall this message
    pub async fn recall(&self) -> Result<ApiReply<Value>> {
        let message_id = self.message_id.ok_or_else(|| {
            Error::InvalidState("the gateway reported no id for this message".into())
        })?;
        self.outbound.recall(self.target, message_id).await
    }
}
