//! Event dispatcher - classifies inbound payloads and fans them out
//!
//! Listeners run in registration order. For each event every listener is
//! invoked before the next event is looked at; the futures they return are
//! driven afterwards by [`Dispatched::finish`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use tracing::{debug, warn};

use super::kind::{EventKind, MessageKind};
use super::model::{DomainEvent, IncomingMessage};
use crate::error::Result;
use crate::outbound::Outbound;
use crate::protocol::{unwrap_envelope, ApiReply, StatusEnvelope};

/// Listener for chat messages
pub type MessageHandler = Arc<dyn Fn(IncomingMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Listener for catalog events
pub type EventHandler = Arc<dyn Fn(DomainEvent) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Listener for payloads whose tag is not in the catalog
pub type RawHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Which chat categories reach message listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenScope {
    /// Every chat message
    #[default]
    All,
    /// Friend messages only
    Friend,
    /// Group messages only
    Group,
    /// Temp messages only
    Temp,
}

impl ListenScope {
    /// Whether a message kind passes this scope
    pub fn admits(&self, kind: MessageKind) -> bool {
        matches!(
            (self, kind),
            (ListenScope::All, _)
                | (ListenScope::Friend, MessageKind::Friend)
                | (ListenScope::Group, MessageKind::Group)
                | (ListenScope::Temp, MessageKind::Temp)
        )
    }
}

impl std::str::FromStr for ListenScope {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "all" => Ok(ListenScope::All),
            "friend" => Ok(ListenScope::Friend),
            "group" => Ok(ListenScope::Group),
            "temp" => Ok(ListenScope::Temp),
            _ => Err(crate::Error::Config(format!(
                "Invalid listen scope: {}. Valid options: all, friend, group, temp",
                s
            ))),
        }
    }
}

/// What happened to one inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Carried a non-zero status; no listener ran
    Rejected(StatusEnvelope),
    /// Chat message handed to message listeners
    Message(MessageKind),
    /// Chat message outside the listen scope
    OutOfScope(MessageKind),
    /// Catalog event handed to its listeners
    Event(EventKind),
    /// Unrecognized tag handed to raw listeners
    Raw(String),
    /// Unrecognized tag nobody listens for
    Unrecognized(String),
    /// Not an event at all
    Malformed,
}

/// Listener futures of one dispatched event
#[must_use = "listener futures do nothing unless finished"]
pub struct Dispatched {
    /// Classification of the payload
    pub outcome: Outcome,
    pending: Vec<BoxFuture<'static, Result<()>>>,
}

impl Dispatched {
    fn idle(outcome: Outcome) -> Self {
        Dispatched {
            outcome,
            pending: Vec::new(),
        }
    }

    /// Number of listeners invoked
    pub fn listeners(&self) -> usize {
        self.pending.len()
    }

    /// Drive every listener to completion, logging failures
    pub async fn finish(self) {
        let outcome = self.outcome;
        for (index, result) in join_all(self.pending).await.into_iter().enumerate() {
            if let Err(e) = result {
                warn!(?outcome, listener = index, error = %e, "Listener failed");
            }
        }
    }
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatched")
            .field("outcome", &self.outcome)
            .field("listeners", &self.pending.len())
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    messages: Vec<MessageHandler>,
    events: HashMap<EventKind, Vec<EventHandler>>,
    raw: HashMap<String, Vec<RawHandler>>,
}

/// Routes inbound payloads to registered listeners
pub struct Dispatcher {
    registry: RwLock<Registry>,
    scope: RwLock<ListenScope>,
    outbound: Outbound,
}

impl Dispatcher {
    /// Create a dispatcher whose affordances answer through `outbound`
    pub fn new(outbound: Outbound) -> Self {
        Dispatcher {
            registry: RwLock::new(Registry::default()),
            scope: RwLock::new(ListenScope::All),
            outbound,
        }
    }

    /// Narrow which chat messages reach message listeners
    pub fn set_scope(&self, scope: ListenScope) {
        *self.scope.write().unwrap_or_else(PoisonError::into_inner) = scope;
    }

    /// Current listen scope
    pub fn scope(&self) -> ListenScope {
        *self.scope.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a chat message listener
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: MessageHandler = Arc::new(move |message| Box::pin(handler(message)));
        self.write().messages.push(handler);
    }

    /// Register a listener for one catalog event
    pub fn on_event<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.write().events.entry(kind).or_default().push(handler);
    }

    /// Register a listener for a tag outside the catalog
    pub fn on_raw_event<F, Fut>(&self, tag: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: RawHandler = Arc::new(move |raw| Box::pin(handler(raw)));
        self.write().raw.entry(tag.into()).or_default().push(handler);
    }

    /// Classify one payload and invoke its listeners
    pub fn dispatch(&self, payload: Value) -> Dispatched {
        let payload = match unwrap_envelope(payload) {
            ApiReply::Success(payload) => payload,
            ApiReply::Rejected(envelope) => {
                warn!(code = envelope.code, msg = %envelope.msg, "Dropping event with a failure status");
                return Dispatched::idle(Outcome::Rejected(envelope));
            }
        };

        let Some(tag) = payload.get("type").and_then(Value::as_str).map(String::from) else {
            warn!("Dropping payload without a type tag");
            return Dispatched::idle(Outcome::Malformed);
        };

        if let Some(kind) = MessageKind::from_wire(&tag) {
            return self.dispatch_message(kind, payload);
        }
        if let Some(kind) = EventKind::from_wire(&tag) {
            let handlers = self.read().events.get(&kind).cloned().unwrap_or_default();
            let event = DomainEvent::new(kind, payload, self.outbound.clone());
            debug!(%kind, listeners = handlers.len(), "dispatching event");
            let pending = handlers.iter().map(|handler| handler(event.clone())).collect();
            return Dispatched {
                outcome: Outcome::Event(kind),
                pending,
            };
        }

        let handlers = self.read().raw.get(&tag).cloned().unwrap_or_default();
        if handlers.is_empty() {
            warn!(tag = %tag, "No listener for unrecognized event");
            return Dispatched::idle(Outcome::Unrecognized(tag));
        }
        debug!(tag = %tag, listeners = handlers.len(), "dispatching raw event");
        let pending = handlers
            .iter()
            .map(|handler| handler(payload.clone()))
            .collect();
        Dispatched {
            outcome: Outcome::Raw(tag),
            pending,
        }
    }

    fn dispatch_message(&self, kind: MessageKind, payload: Value) -> Dispatched {
        if !self.scope().admits(kind) {
            debug!(%kind, "message outside listen scope");
            return Dispatched::idle(Outcome::OutOfScope(kind));
        }
        let message = match IncomingMessage::parse(kind, payload, self.outbound.clone()) {
            Ok(message) => message,
            Err(e) => {
                warn!(%kind, error = %e, "Dropping malformed message");
                return Dispatched::idle(Outcome::Malformed);
            }
        };
        let handlers = self.read().messages.clone();
        debug!(%kind, listeners = handlers.len(), "dispatching message");
        let pending = handlers
            .iter()
            .map(|handler| handler(message.clone()))
            .collect();
        Dispatched {
            outcome: Outcome::Message(kind),
            pending,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.read();
        f.debug_struct("Dispatcher")
            .field("message_listeners", &registry.messages.len())
            .field("event_kinds", &registry.events.len())
            .field("raw_tags", &registry.raw.len())
            .field("scope", &self.scope())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::{Procedure, ProtocolVersion};
    use crate::session::ContextHandle;
    use crate::transport::testing::RecordingTransport;
    use serde_json::json;
    use std::sync::Mutex;

    fn dispatcher(transport: Arc<RecordingTransport>) -> Dispatcher {
        let contexts = ContextHandle::fixed("S", 10001, ProtocolVersion::default());
        Dispatcher::new(Outbound::new(transport, contexts))
    }

    fn friend_message(chain: Value) -> Value {
        json!({
            "type": "FriendMessage",
            "sender": {"id": 5, "nickname": "bob", "remark": ""},
            "messageChain": chain
        })
    }

    fn group_message() -> Value {
        json!({
            "type": "GroupMessage",
            "sender": {
                "id": 7, "memberName": "carol", "permission": "MEMBER",
                "group": {"id": 42, "name": "g", "permission": "ADMINISTRATOR"}
            },
            "messageChain": [{"type": "Source", "id": 900, "time": 0}, {"type": "Plain", "text": "hi"}]
        })
    }

    #[tokio::test]
    async fn test_failure_status_invokes_nothing() {
        let dispatcher = dispatcher(RecordingTransport::replying(json!({"code": 0})));
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        dispatcher.on_message(move |_| {
            *counter.lock().unwrap() += 1;
            async { Ok(()) }
        });

        let dispatched = dispatcher.dispatch(json!({"code": 5, "msg": "target not found"}));
        assert!(matches!(dispatched.outcome, Outcome::Rejected(ref env) if env.code == 5));
        assert_eq!(dispatched.listeners(), 0);
        dispatched.finish().await;
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_listeners_invoked_in_registration_order() {
        let dispatcher = dispatcher(RecordingTransport::replying(json!({"code": 0})));
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            dispatcher.on_message(move |message| {
                order.lock().unwrap().push((n, message.text()));
                async { Ok(()) }
            });
        }

        let dispatched =
            dispatcher.dispatch(json!({"code": 0, "data": friend_message(json!([{"type": "Plain", "text": "x"}]))}));
        // Invocation happens before finish.
        assert_eq!(
            *order.lock().unwrap(),
            vec![(0, "x".to_string()), (1, "x".to_string()), (2, "x".to_string())]
        );
        assert_eq!(dispatched.outcome, Outcome::Message(MessageKind::Friend));
        dispatched.finish().await;
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_others() {
        let dispatcher = dispatcher(RecordingTransport::replying(json!({"code": 0})));
        let ran = Arc::new(Mutex::new(false));
        dispatcher.on_message(|_| async { Err(Error::InvalidState("boom".into())) });
        let flag = ran.clone();
        dispatcher.on_message(move |_| {
            let flag = flag.clone();
            async move {
                *flag.lock().unwrap() = true;
                Ok(())
            }
        });

        dispatcher.dispatch(group_message()).finish().await;
        assert!(*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn test_reply_affordances() {
        let transport = RecordingTransport::replying(json!({"code": 0, "messageId": 1}));
        let dispatcher = dispatcher(transport.clone());
        dispatcher.on_message(|message| async move {
            message.quote_reply("pong").await?;
            Ok(())
        });

        dispatcher.dispatch(group_message()).finish().await;
        let (procedure, payload) = transport.last();
        assert_eq!(procedure, Procedure::SendGroupMessage);
        assert_eq!(payload["target"], 42);
        assert_eq!(payload["quote"], 900);

        dispatcher
            .dispatch(friend_message(json!([{"type": "Plain", "text": "no source"}])))
            .finish()
            .await;
        let (procedure, payload) = transport.last();
        assert_eq!(procedure, Procedure::SendFriendMessage);
        assert_eq!(payload["target"], 5);
        assert!(payload.get("quote").is_none());
    }

    #[tokio::test]
    async fn test_scope_filters_messages_only() {
        let dispatcher = dispatcher(RecordingTransport::replying(json!({"code": 0})));
        dispatcher.on_message(|_| async { Ok(()) });
        dispatcher.on_event(EventKind::BotOnline, |_| async { Ok(()) });
        dispatcher.set_scope(ListenScope::Group);

        let friend = dispatcher.dispatch(friend_message(json!([])));
        assert_eq!(friend.outcome, Outcome::OutOfScope(MessageKind::Friend));
        assert_eq!(friend.listeners(), 0);

        let group = dispatcher.dispatch(group_message());
        assert_eq!(group.listeners(), 1);

        let online = dispatcher.dispatch(json!({"type": "BotOnlineEvent", "qq": 10001}));
        assert_eq!(online.outcome, Outcome::Event(EventKind::BotOnline));
        assert_eq!(online.listeners(), 1);
    }

    #[tokio::test]
    async fn test_friend_request_responders() {
        let transport = RecordingTransport::replying(json!({"code": 0, "msg": "success"}));
        let dispatcher = dispatcher(transport.clone());
        dispatcher.on_event(EventKind::NewFriendRequest, |event| async move {
            let request = event.friend_request().expect("friend request");
            request.accept("welcome").await?;
            Ok(())
        });

        dispatcher
            .dispatch(json!({
                "type": "NewFriendRequestEvent",
                "eventId": 12, "fromId": 34, "groupId": 0, "nick": "dave", "message": "hi"
            }))
            .finish()
            .await;

        assert_eq!(
            transport.last(),
            (
                Procedure::RespondNewFriendRequest,
                json!({
                    "eventId": 12, "fromId": 34, "groupId": 0,
                    "operate": 0, "message": "welcome", "sessionKey": "S"
                })
            )
        );
    }

    #[tokio::test]
    async fn test_member_join_request_operate_codes() {
        let transport = RecordingTransport::replying(json!({"code": 0}));
        let dispatcher = dispatcher(transport.clone());
        let captured = Arc::new(Mutex::new(None));
        let slot = captured.clone();
        dispatcher.on_event(EventKind::MemberJoinRequest, move |event| {
            *slot.lock().unwrap() = event.member_join_request();
            async { Ok(()) }
        });
        dispatcher
            .dispatch(json!({
                "type": "MemberJoinRequestEvent",
                "eventId": 1, "fromId": 2, "groupId": 3, "groupName": "g", "nick": "n", "message": ""
            }))
            .finish()
            .await;

        let request = captured.lock().unwrap().take().unwrap();
        assert!(DomainEvent::new(
            EventKind::Nudge,
            json!({}),
            Outbound::new(transport.clone(), ContextHandle::fixed("S", 1, ProtocolVersion::default()))
        )
        .member_join_request()
        .is_none());

        request.ignore("").await.unwrap();
        assert_eq!(transport.last().1["operate"], 2);
        request.reject_and_block("").await.unwrap();
        assert_eq!(transport.last().1["operate"], 3);
        request.ignore_and_block("").await.unwrap();
        assert_eq!(transport.last().1["operate"], 4);
        assert_eq!(transport.last().0, Procedure::RespondMemberJoinRequest);
    }

    #[tokio::test]
    async fn test_event_listeners_invoked_in_registration_order() {
        let dispatcher = dispatcher(RecordingTransport::replying(json!({"code": 0})));
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            dispatcher.on_event(EventKind::GroupRecall, move |event| {
                order.lock().unwrap().push((n, event.raw["messageId"].as_i64()));
                async { Ok(()) }
            });
        }
        let strays = Arc::new(Mutex::new(0));
        let counter = strays.clone();
        dispatcher.on_event(EventKind::FriendRecall, move |_| {
            *counter.lock().unwrap() += 1;
            async { Ok(()) }
        });

        let dispatched = dispatcher.dispatch(json!({
            "type": "GroupRecallEvent",
            "authorId": 5, "messageId": 77, "time": 1700000000,
            "group": {"id": 9, "name": "g", "permission": "MEMBER"},
            "operator": null
        }));
        assert_eq!(
            *order.lock().unwrap(),
            vec![(0, Some(77)), (1, Some(77)), (2, Some(77))]
        );
        assert_eq!(dispatched.outcome, Outcome::Event(EventKind::GroupRecall));
        assert_eq!(dispatched.listeners(), 3);
        assert_eq!(*strays.lock().unwrap(), 0);
        dispatched.finish().await;
    }

    #[tokio::test]
    async fn test_group_invitation_responders() {
        let transport = RecordingTransport::replying(json!({"code": 0}));
        let dispatcher = dispatcher(transport.clone());
        let captured = Arc::new(Mutex::new(None));
        let slot = captured.clone();
        dispatcher.on_event(EventKind::BotInvitedJoinGroupRequest, move |event| {
            *slot.lock().unwrap() = event.group_invitation();
            async { Ok(()) }
        });
        dispatcher
            .dispatch(json!({
                "type": "BotInvitedJoinGroupRequestEvent",
                "eventId": 5, "fromId": 6, "groupId": 7, "groupName": "rustaceans",
                "nick": "eve", "message": "join us"
            }))
            .finish()
            .await;

        let invitation = captured.lock().unwrap().take().unwrap();
        assert_eq!(invitation.request.group_name.as_deref(), Some("rustaceans"));

        invitation.accept("").await.unwrap();
        assert_eq!(
            transport.last(),
            (
                Procedure::RespondBotInvitedJoinGroupRequest,
                json!({
                    "eventId": 5, "fromId": 6, "groupId": 7,
                    "operate": 0, "message": "", "sessionKey": "S"
                })
            )
        );
        invitation.reject("no thanks").await.unwrap();
        assert_eq!(transport.last().1["operate"], 1);
        assert_eq!(transport.last().1["message"], "no thanks");
    }

    #[tokio::test]
    async fn test_unrecognized_tags() {
        let dispatcher = dispatcher(RecordingTransport::replying(json!({"code": 0})));

        let dropped = dispatcher.dispatch(json!({"type": "StrangerMessage"}));
        assert_eq!(dropped.outcome, Outcome::Unrecognized("StrangerMessage".into()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.on_raw_event("StrangerMessage", move |raw| {
            sink.lock().unwrap().push(raw);
            async { Ok(()) }
        });
        let handled = dispatcher.dispatch(json!({"type": "StrangerMessage", "sender": {"id": 1}}));
        assert_eq!(handled.outcome, Outcome::Raw("StrangerMessage".into()));
        handled.finish().await;
        assert_eq!(seen.lock().unwrap()[0]["sender"]["id"], 1);

        assert_eq!(
            dispatcher.dispatch(json!({"no": "type"})).outcome,
            Outcome::Malformed
        );
    }
}
