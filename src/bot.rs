//! Bot facade
//!
//! Wires one session, one transport, one outbound envelope and one dispatcher
//! together for a single bot account.
//!
//! ```no_run
//! use mirai_link::{Bot, BotConfig, ListenScope};
//!
//! # async fn run() -> mirai_link::Result<()> {
//! let bot = Bot::connect(BotConfig::minimal("http://127.0.0.1:8080", "INITKEY", 10001)?).await?;
//! bot.verify().await?;
//! bot.on_message(|message| async move {
//!     if message.text() == "ping" {
//!         message.reply("pong").await?;
//!     }
//!     Ok(())
//! });
//! bot.listen(ListenScope::All).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::BotConfig;
use crate::error::{Error, Result};
use crate::event::{
    run_poll_loop, run_push_consumer, DomainEvent, Dispatcher, EventKind, IncomingMessage,
    ListenScope,
};
use crate::message::MessageChain;
use crate::outbound::{Outbound, SentMessage, Target};
use crate::protocol::{ApiReply, Procedure, ProtocolVersion};
use crate::session::{ContextHandle, SessionMachine, SessionState, Signal};
use crate::transport::{
    normalize_endpoint, session_from_handshake, websocket_url, CallContext, HybridTransport,
    PollTransport, PushTransport, Transport, TransportMode,
};

/// Gateway route carrying both chat messages and domain events
const PUSH_ROUTE: &str = "all";

/// A connected bot account
pub struct Bot {
    config: BotConfig,
    session: Arc<SessionMachine>,
    transport: Arc<dyn Transport>,
    outbound: Outbound,
    dispatcher: Arc<Dispatcher>,
    listening: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bot {
    /// Build the transport, settle the protocol version and authenticate
    ///
    /// A refused credential leaves the bot in [`SessionState::Failed`] rather
    /// than returning an error; only unusable configuration fails here.
    pub async fn connect(config: BotConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = normalize_endpoint(config.endpoint.clone());

        let version = match config.protocol_version {
            Some(version) => version,
            None if config.transport == TransportMode::Push => ProtocolVersion::default(),
            None => detect_version(&endpoint, config.call_timeout).await,
        };
        if version.is_legacy() && config.transport != TransportMode::Poll {
            return Err(Error::Config(format!(
                "protocol {} has no WebSocket channel, use the poll transport",
                version
            )));
        }

        let session = Arc::new(SessionMachine::new(
            config.account_id,
            version,
            config.verify_key.clone(),
        ));

        let transport: Arc<dyn Transport> = match config.transport {
            TransportMode::Poll => {
                let poll = Arc::new(PollTransport::new(endpoint.clone(), config.call_timeout)?);
                let _ = session.authenticate(poll.as_ref()).await;
                poll
            }
            TransportMode::Hybrid => {
                let hybrid = Arc::new(HybridTransport::new(
                    PollTransport::new(endpoint.clone(), config.call_timeout)?,
                    config.verify_key.clone(),
                    config.reserved_sync_id,
                    config.call_timeout,
                ));
                let _ = session.authenticate(hybrid.as_ref()).await;
                hybrid
            }
            TransportMode::Push => {
                let push = Arc::new(PushTransport::new(
                    config.reserved_sync_id,
                    config.call_timeout,
                ));
                let url = websocket_url(
                    &endpoint,
                    PUSH_ROUTE,
                    &[
                        ("verifyKey", config.verify_key.expose_secret().to_string()),
                        ("qq", config.account_id.to_string()),
                    ],
                )?;
                open_push_session(&push, &url, &session).await;
                push
            }
        };

        let outbound = Outbound::new(transport.clone(), session.context());
        let dispatcher = Arc::new(Dispatcher::new(outbound.clone()));
        info!(
            account = config.account_id,
            mode = %config.transport,
            %version,
            state = %session.state(),
            "Bot connected"
        );

        Ok(Bot {
            config,
            session,
            transport,
            outbound,
            dispatcher,
            listening: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Configuration the bot was built from
    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Read-only session view for collaborators
    pub fn context(&self) -> ContextHandle {
        self.session.context()
    }

    /// Snapshot for a single call
    pub fn call_context(&self) -> CallContext {
        self.session.context().current()
    }

    /// Run `handler` when `signal` fires, or now if it already has
    pub fn on_signal(&self, signal: Signal, handler: impl Fn() + Send + Sync + 'static) {
        self.session.on_signal(signal, Arc::new(handler));
    }

    /// Wait for a lifecycle signal
    pub async fn wait_for(&self, signal: Signal) -> Result<()> {
        self.session.wait_for(signal).await
    }

    /// Bind the session to the account
    pub async fn verify(&self) -> Result<()> {
        self.session.verify(self.transport.as_ref()).await
    }

    /// Invalidate the session and close the transport
    ///
    /// The event loops observe the state change and stop.
    pub async fn release(&self) -> Result<()> {
        let released = self.session.release(self.transport.as_ref()).await;
        self.transport.close().await;
        released
    }

    /// Start delivering events to listeners
    ///
    /// Uses the transport's push stream when it has one, a poll loop
    /// otherwise. Calling it again while listening only updates the scope.
    pub async fn listen(&self, scope: ListenScope) -> Result<()> {
        let snapshot = self.session.snapshot();
        if snapshot.state.is_terminal() || !snapshot.verified {
            return Err(Error::InvalidState(format!(
                "cannot listen while the session is {}",
                snapshot.state
            )));
        }

        self.dispatcher.set_scope(scope);
        if self.listening.swap(true, Ordering::SeqCst) {
            debug!(?scope, "Already listening, scope updated");
            return Ok(());
        }

        let context = self.session.context();
        let stream = match self.transport.subscribe(&context.current()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.listening.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let task = match stream {
            Some(events) => {
                let dispatcher = self.dispatcher.clone();
                let session = self.session.clone();
                tokio::spawn(async move {
                    run_push_consumer(dispatcher, events, context.watch()).await;
                    if !session.state().is_terminal() {
                        error!("Push channel lost while the session was live");
                        session.fail("push channel closed by the gateway");
                    }
                })
            }
            None => tokio::spawn(run_poll_loop(
                self.dispatcher.clone(),
                self.outbound.clone(),
                self.config.poll_interval,
                self.config.fetch_count,
                context.watch(),
            )),
        };
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
        info!(?scope, mode = %self.transport.mode(), "Listening for events");
        Ok(())
    }

    /// Whether an event source is running
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Register a chat message listener
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatcher.on_message(handler);
    }

    /// Register a listener for a catalog event
    pub fn on_event<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatcher.on_event(kind, handler);
    }

    /// Register a listener for a tag outside the catalog
    pub fn on_raw_event<F, Fut>(&self, tag: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatcher.on_raw_event(tag, handler);
    }

    /// Send to a friend
    pub async fn send_friend_message(
        &self,
        qq: i64,
        chain: impl Into<MessageChain>,
    ) -> Result<ApiReply<SentMessage>> {
        self.send(Target::Friend(qq), chain, None).await
    }

    /// Send to a group
    pub async fn send_group_message(
        &self,
        group: i64,
        chain: impl Into<MessageChain>,
    ) -> Result<ApiReply<SentMessage>> {
        self.send(Target::Group(group), chain, None).await
    }

    /// Send to a group member through a temporary session
    pub async fn send_temp_message(
        &self,
        group: i64,
        qq: i64,
        chain: impl Into<MessageChain>,
    ) -> Result<ApiReply<SentMessage>> {
        self.send(Target::Temp { group, qq }, chain, None).await
    }

    /// Send to any target, optionally quoting a message id
    pub async fn send(
        &self,
        target: Target,
        chain: impl Into<MessageChain>,
        quote: Option<i64>,
    ) -> Result<ApiReply<SentMessage>> {
        self.outbound.send(target, chain, quote).await
    }

    /// Answer a message in its own conversation
    pub async fn reply(
        &self,
        message: &IncomingMessage,
        chain: impl Into<MessageChain>,
    ) -> Result<ApiReply<SentMessage>> {
        message.reply(chain).await
    }

    /// Answer a message, quoting it
    pub async fn quote_reply(
        &self,
        message: &IncomingMessage,
        chain: impl Into<MessageChain>,
    ) -> Result<ApiReply<SentMessage>> {
        message.quote_reply(chain).await
    }

    /// Recall a message in a conversation
    pub async fn recall(&self, target: Target, message_id: i64) -> Result<ApiReply<Value>> {
        self.outbound.recall(target, message_id).await
    }

    /// Drain up to `count` queued events without dispatching them
    pub async fn fetch_messages(&self, count: usize) -> Result<ApiReply<Vec<Value>>> {
        let reply = self
            .outbound
            .call(Procedure::FetchMessage, json!({ "count": count }))
            .await?;
        Ok(reply.map(|body| match body {
            Value::Array(events) => events,
            _ => Vec::new(),
        }))
    }

    /// Gateway build information
    pub async fn about(&self) -> Result<ApiReply<Value>> {
        self.outbound.call(Procedure::About, Value::Null).await
    }

    /// Issue any procedure with the current session context
    pub async fn call(&self, procedure: Procedure, payload: Value) -> Result<ApiReply<Value>> {
        self.outbound.call(procedure, payload).await
    }

    /// Outbound envelope shared with listeners
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Dispatcher, for feeding payloads from elsewhere
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl Drop for Bot {
    fn drop(&mut self) {
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("account_id", &self.config.account_id)
            .field("mode", &self.transport.mode())
            .field("state", &self.session.state())
            .field("listening", &self.is_listening())
            .finish()
    }
}

/// Ask the gateway which protocol it speaks
///
/// Any failure falls back to the default version.
async fn detect_version(endpoint: &Url, timeout: Duration) -> ProtocolVersion {
    let fallback = ProtocolVersion::default();
    let about_client = match PollTransport::new(endpoint.clone(), timeout) {
        Ok(about_client) => about_client,
        Err(e) => {
            warn!(error = %e, %fallback, "Cannot build the version detection client, assuming default");
            return fallback;
        }
    };
    let context = CallContext::anonymous(0, fallback);

    match about_client.call(&context, &Procedure::About, Value::Null).await {
        Ok(ApiReply::Success(body)) => {
            match body.get("version").and_then(Value::as_str).map(str::parse) {
                Some(Ok(version)) => {
                    debug!(%version, "Detected gateway protocol version");
                    version
                }
                _ => {
                    warn!(%body, %fallback, "About reply carried no usable version, assuming default");
                    fallback
                }
            }
        }
        Ok(ApiReply::Rejected(envelope)) => {
            warn!(code = envelope.code, %fallback, "About call rejected, assuming default version");
            fallback
        }
        Err(e) => {
            warn!(error = %e, %fallback, "About call failed, assuming default version");
            fallback
        }
    }
}

/// Open the duplex channel; its handshake stands in for authenticate + verify
async fn open_push_session(push: &PushTransport, url: &Url, session: &SessionMachine) {
    let handshake = match push.open(url).await {
        Ok(handshake) => handshake,
        Err(e) => {
            error!(error = %e, "Push channel did not open");
            session.fail(format!("push channel did not open: {}", e));
            return;
        }
    };

    let accepted = session_from_handshake(&handshake)
        .and_then(|key| session.accept_handshake(key));
    if let Err(e) = accepted {
        error!(error = %e, "Push handshake refused");
        session.fail(e.to_string());
        push.shutdown();
    }
}
