//! Push transport: one WebSocket carrying calls, replies and server pushes
//!
//! Every call is written as `{syncId, command, subCommand, content}` and
//! answered by a frame bearing the same `syncId`. Frames stamped with the
//! reserved id are unsolicited pushes. The very first frame, with an empty
//! `syncId`, is the channel handshake carrying `{code, session}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{with_session_key, CallContext, EventStream, Transport, TransportMode};
use crate::error::{Error, Result};
use crate::protocol::{status_codes, unwrap_envelope, ApiReply, Procedure};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sync id the gateway stamps on server pushes unless configured otherwise
pub const DEFAULT_RESERVED_SYNC_ID: i64 = -1;

/// Monotonic correlation ids that never hand out the reserved one
#[derive(Debug)]
struct SyncIds {
    next: AtomicI64,
    reserved: i64,
}

impl SyncIds {
    fn new(reserved: i64) -> Self {
        SyncIds {
            next: AtomicI64::new(0),
            reserved,
        }
    }

    fn next(&self) -> i64 {
        loop {
            let id = self.next.fetch_add(1, Ordering::SeqCst);
            if id != self.reserved {
                return id;
            }
        }
    }
}

/// Pending replies keyed by sync id
#[derive(Debug)]
struct Correlator {
    ids: SyncIds,
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
}

impl Correlator {
    fn new(reserved: i64) -> Self {
        Correlator {
            ids: SyncIds::new(reserved),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn reserved(&self) -> i64 {
        self.ids.reserved
    }

    async fn register(&self) -> (i64, oneshot::Receiver<Value>) {
        let id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        (id, rx)
    }

    async fn forget(&self, id: i64) {
        self.pending.lock().await.remove(&id);
    }

    /// Hand a reply to its waiter; false if nobody asked for it
    async fn resolve(&self, id: i64, reply: Value) -> bool {
        match self.pending.lock().await.remove(&id) {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Drop every waiter so outstanding calls observe the closed channel
    async fn close(&self) {
        self.pending.lock().await.clear();
    }
}

/// How a frame's `syncId` classifies it
#[derive(Debug, PartialEq, Eq)]
enum FrameId {
    /// Missing or empty
    Empty,
    /// A numeric id, sent either as a number or a string
    Id(i64),
    /// Anything else
    Invalid,
}

impl FrameId {
    fn of(frame: &Value) -> Self {
        match frame.get("syncId") {
            None | Some(Value::Null) => FrameId::Empty,
            Some(Value::Number(n)) => n.as_i64().map_or(FrameId::Invalid, FrameId::Id),
            Some(Value::String(s)) if s.trim().is_empty() => FrameId::Empty,
            Some(Value::String(s)) => s.trim().parse().map_or(FrameId::Invalid, FrameId::Id),
            Some(_) => FrameId::Invalid,
        }
    }
}

/// Routes inbound frames to waiters, the handshake, or the event stream
struct FrameRouter {
    correlator: Arc<Correlator>,
    events: mpsc::UnboundedSender<Value>,
    handshake: Option<oneshot::Sender<Value>>,
}

impl FrameRouter {
    async fn route(&mut self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable push frame");
                return;
            }
        };
        let id = FrameId::of(&frame);
        let data = match frame {
            Value::Object(mut map) => map.remove("data").unwrap_or(Value::Object(map)),
            other => other,
        };

        match id {
            FrameId::Empty => match self.handshake.take() {
                Some(tx) => {
                    let _ = tx.send(data);
                }
                None => self.push_event(data),
            },
            FrameId::Id(id) if id == self.correlator.reserved() => self.push_event(data),
            FrameId::Id(id) => {
                if !self.correlator.resolve(id, data).await {
                    debug!(sync_id = id, "Reply for a call nobody is waiting on");
                }
            }
            FrameId::Invalid => debug!("Ignoring frame with a malformed syncId"),
        }
    }

    fn push_event(&self, data: Value) {
        if self.events.send(data).is_err() {
            debug!("Event stream dropped, discarding push");
        }
    }
}

/// Session token carried by a channel handshake
pub(crate) fn session_from_handshake(handshake: &Value) -> Result<String> {
    let code = handshake
        .get("code")
        .and_then(Value::as_i64)
        .unwrap_or(status_codes::SUCCESS);
    if code != status_codes::SUCCESS {
        let msg = handshake
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("channel handshake rejected");
        return Err(Error::Authentication(format!("code {}: {}", code, msg)));
    }
    handshake
        .get("session")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| Error::Authentication("handshake carried no session".into()))
}

enum Outgoing {
    Frame(String),
    Close,
}

/// Duplex WebSocket transport
pub struct PushTransport {
    correlator: Arc<Correlator>,
    outbound: mpsc::UnboundedSender<Outgoing>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outgoing>>>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    events_rx: Mutex<Option<EventStream>>,
    connected: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl PushTransport {
    /// Create an unopened transport
    pub fn new(reserved_sync_id: i64, call_timeout: Duration) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        PushTransport {
            correlator: Arc::new(Correlator::new(reserved_sync_id)),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
            connected: Arc::new(AtomicBool::new(false)),
            call_timeout,
        }
    }

    /// Whether the channel is open
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect and wait for the handshake frame
    ///
    /// Returns the handshake payload (`{code, session}`); the caller decides
    /// what a non-zero code means.
    pub async fn open(&self, url: &Url) -> Result<Value> {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::InvalidState("push channel already opened".into()))?;

        // The reader owns the only sender, so the stream ends with the socket.
        let events = self
            .events_tx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::InvalidState("push channel already opened".into()))?;

        info!(url = %redacted(url), "Opening push channel");
        let (stream, _) = connect_async(url.as_str()).await?;
        let (sink, source) = stream.split();

        let (handshake_tx, handshake_rx) = oneshot::channel();
        let router = FrameRouter {
            correlator: self.correlator.clone(),
            events,
            handshake: Some(handshake_tx),
        };
        self.connected.store(true, Ordering::SeqCst);

        tokio::spawn(write_loop(sink, outbound_rx));
        tokio::spawn(read_loop(source, router, self.connected.clone()));

        let failure = match tokio::time::timeout(self.call_timeout, handshake_rx).await {
            Ok(Ok(handshake)) => return Ok(handshake),
            Ok(Err(_)) => Error::ChannelClosed("push channel closed before the handshake".into()),
            Err(_) => Error::Timeout(format!(
                "no push channel handshake within {:?}",
                self.call_timeout
            )),
        };
        self.shutdown();
        Err(failure)
    }

    /// Ask the writer to close the channel
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Outgoing::Close);
    }
}

impl std::fmt::Debug for PushTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushTransport")
            .field("connected", &self.is_connected())
            .field("reserved_sync_id", &self.correlator.reserved())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

/// URL with credentials stripped from the query, for logs
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outgoing::Frame(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "Push channel write failed");
                    break;
                }
            }
            Outgoing::Close => break,
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut source: SplitStream<WsStream>,
    mut router: FrameRouter,
    connected: Arc<AtomicBool>,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => router.route(text.as_str()).await,
            Ok(Message::Close(frame)) => {
                debug!(?frame, "Push channel closed by gateway");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Push channel read failed");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    router.correlator.close().await;
    info!("Push channel closed");
}

#[async_trait]
impl Transport for PushTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Push
    }

    async fn call(
        &self,
        context: &CallContext,
        procedure: &Procedure,
        payload: Value,
    ) -> Result<ApiReply<Value>> {
        if !self.is_connected() {
            return Err(Error::ChannelClosed("push channel is not open".into()));
        }

        let (sync_id, reply) = self.correlator.register().await;
        let (command, sub_command) = procedure.command();
        let frame = json!({
            "syncId": sync_id,
            "command": command,
            "subCommand": sub_command,
            "content": with_session_key(payload, context),
        });
        debug!(sync_id, procedure = %procedure, "push call");

        if self.outbound.send(Outgoing::Frame(frame.to_string())).is_err() {
            self.correlator.forget(sync_id).await;
            return Err(Error::ChannelClosed("push channel writer is gone".into()));
        }

        match tokio::time::timeout(self.call_timeout, reply).await {
            Ok(Ok(reply)) => Ok(unwrap_envelope(reply)),
            Ok(Err(_)) => Err(Error::ChannelClosed(format!(
                "push channel closed before syncId {} was answered",
                sync_id
            ))),
            Err(_) => {
                self.correlator.forget(sync_id).await;
                Err(Error::Timeout(format!(
                    "no reply to {} (syncId {}) within {:?}",
                    procedure, sync_id, self.call_timeout
                )))
            }
        }
    }

    async fn subscribe(&self, _context: &CallContext) -> Result<Option<EventStream>> {
        self.events_rx
            .lock()
            .await
            .take()
            .map(Some)
            .ok_or_else(|| Error::InvalidState("push event stream already taken".into()))
    }

    async fn close(&self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolVersion;
    use tokio::net::TcpListener;

    fn context() -> CallContext {
        CallContext {
            session_key: Some("SESSION".into()),
            account_id: 10001,
            version: ProtocolVersion::default(),
        }
    }

    fn router() -> (
        FrameRouter,
        mpsc::UnboundedReceiver<Value>,
        oneshot::Receiver<Value>,
    ) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (handshake, handshake_rx) = oneshot::channel();
        let router = FrameRouter {
            correlator: Arc::new(Correlator::new(DEFAULT_RESERVED_SYNC_ID)),
            events,
            handshake: Some(handshake),
        };
        (router, events_rx, handshake_rx)
    }

    async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("gateway lost the client: {:?}", other),
            }
        }
    }

    async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
        ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    /// Accept one client and run a scripted gateway against it
    async fn gateway<F, Fut>(script: F) -> Url
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            script(ws).await;
        });
        Url::parse(&format!("ws://{}/all?verifyKey=k&qq=10001", addr)).unwrap()
    }

    #[test]
    fn test_sync_ids_skip_reserved() {
        let ids = SyncIds::new(1);
        assert_eq!((ids.next(), ids.next(), ids.next()), (0, 2, 3));

        let ids = SyncIds::new(DEFAULT_RESERVED_SYNC_ID);
        assert_eq!((ids.next(), ids.next()), (0, 1));
    }

    #[test]
    fn test_frame_id_forms() {
        assert_eq!(FrameId::of(&json!({"syncId": ""})), FrameId::Empty);
        assert_eq!(FrameId::of(&json!({})), FrameId::Empty);
        assert_eq!(FrameId::of(&json!({"syncId": "-1"})), FrameId::Id(-1));
        assert_eq!(FrameId::of(&json!({"syncId": 7})), FrameId::Id(7));
        assert_eq!(FrameId::of(&json!({"syncId": "abc"})), FrameId::Invalid);
    }

    #[tokio::test]
    async fn test_router_handshake_then_pushes() {
        let (mut router, mut events, handshake) = router();

        router
            .route(r#"{"syncId":"","data":{"code":0,"session":"S"}}"#)
            .await;
        assert_eq!(handshake.await.unwrap(), json!({"code": 0, "session": "S"}));

        router
            .route(r#"{"syncId":"-1","data":{"type":"BotOnlineEvent","qq":1}}"#)
            .await;
        router.route(r#"{"syncId":"","data":{"type":"NudgeEvent"}}"#).await;

        assert_eq!(events.recv().await.unwrap()["type"], "BotOnlineEvent");
        assert_eq!(events.recv().await.unwrap()["type"], "NudgeEvent");
    }

    #[tokio::test]
    async fn test_router_resolves_matching_reply() {
        let (mut router, mut events, _handshake) = router();
        let (id, reply) = router.correlator.register().await;

        router.route(r#"{"syncId":"999","data":{"code":0}}"#).await;
        router
            .route(&json!({"syncId": id.to_string(), "data": {"code": 0, "messageId": 3}}).to_string())
            .await;

        assert_eq!(reply.await.unwrap(), json!({"code": 0, "messageId": 3}));
        assert!(router.correlator.pending.lock().await.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_handshake_session() {
        assert_eq!(
            session_from_handshake(&json!({"code": 0, "session": "S"})).unwrap(),
            "S"
        );
        assert!(matches!(
            session_from_handshake(&json!({"code": 1, "msg": "wrong key"})),
            Err(Error::Authentication(msg)) if msg.contains("wrong key")
        ));
        assert!(session_from_handshake(&json!({"code": 0})).is_err());
    }

    #[tokio::test]
    async fn test_call_before_open_is_closed() {
        let transport = PushTransport::new(DEFAULT_RESERVED_SYNC_ID, Duration::from_secs(1));
        let result = transport
            .call(&context(), &Procedure::About, Value::Null)
            .await;
        assert!(matches!(result, Err(Error::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let url = gateway(|mut ws| async move {
            send_json(&mut ws, json!({"syncId": "", "data": {"code": 0, "session": "S"}})).await;

            let call = next_json(&mut ws).await;
            assert_eq!(call["command"], "sendFriendMessage");
            assert_eq!(call["content"]["sessionKey"], "SESSION");
            send_json(
                &mut ws,
                json!({"syncId": call["syncId"].to_string(), "data": {"code": 0, "msg": "", "messageId": 11}}),
            )
            .await;

            let call = next_json(&mut ws).await;
            send_json(
                &mut ws,
                json!({"syncId": call["syncId"], "data": {"code": 5, "msg": "target not found"}}),
            )
            .await;

            send_json(&mut ws, json!({"syncId": "-1", "data": {"type": "BotOnlineEvent", "qq": 10001}})).await;
            while ws.next().await.is_some() {}
        })
        .await;

        let transport = PushTransport::new(DEFAULT_RESERVED_SYNC_ID, Duration::from_secs(5));
        let handshake = transport.open(&url).await.unwrap();
        assert_eq!(session_from_handshake(&handshake).unwrap(), "S");
        let mut events = transport.subscribe(&context()).await.unwrap().unwrap();

        let sent = transport
            .call(&context(), &Procedure::SendFriendMessage, json!({"target": 1}))
            .await
            .unwrap();
        assert_eq!(sent.success().unwrap()["messageId"], 11);

        let rejected = transport
            .call(&context(), &Procedure::Recall, json!({"target": 1}))
            .await
            .unwrap();
        assert_eq!(rejected.rejection().map(|env| env.code), Some(5));

        assert_eq!(events.recv().await.unwrap()["type"], "BotOnlineEvent");
        assert!(transport.subscribe(&context()).await.is_err());
        transport.shutdown();
    }

    #[tokio::test]
    async fn test_unanswered_call_times_out() {
        let url = gateway(|mut ws| async move {
            send_json(&mut ws, json!({"syncId": "", "data": {"code": 0, "session": "S"}})).await;
            while ws.next().await.is_some() {}
        })
        .await;

        let transport = PushTransport::new(DEFAULT_RESERVED_SYNC_ID, Duration::from_millis(200));
        transport.open(&url).await.unwrap();

        let result = transport
            .call(&context(), &Procedure::About, Value::Null)
            .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(transport.correlator.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_channel_fails_waiters() {
        let url = gateway(|mut ws| async move {
            send_json(&mut ws, json!({"syncId": "", "data": {"code": 0, "session": "S"}})).await;
            let _ = next_json(&mut ws).await;
        })
        .await;

        let transport = PushTransport::new(DEFAULT_RESERVED_SYNC_ID, Duration::from_secs(5));
        transport.open(&url).await.unwrap();

        let result = transport
            .call(&context(), &Procedure::About, Value::Null)
            .await;

        assert!(matches!(result, Err(Error::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn test_event_stream_ends_when_gateway_closes() {
        let url = gateway(|mut ws| async move {
            send_json(&mut ws, json!({"syncId": "", "data": {"code": 0, "session": "S"}})).await;
            send_json(&mut ws, json!({"syncId": "-1", "data": {"type": "BotOnlineEvent"}})).await;
            let _ = ws.close(None).await;
        })
        .await;

        let transport = PushTransport::new(DEFAULT_RESERVED_SYNC_ID, Duration::from_secs(5));
        transport.open(&url).await.unwrap();
        let mut events = transport.subscribe(&context()).await.unwrap().unwrap();

        assert_eq!(events.recv().await.unwrap()["type"], "BotOnlineEvent");
        let end = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event stream stayed open after the gateway closed");
        assert!(end.is_none());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_missing_handshake_shuts_channel_down() {
        let url = gateway(|mut ws| async move {
            // Never send the handshake; wait for the client to hang up.
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        })
        .await;

        let transport = PushTransport::new(DEFAULT_RESERVED_SYNC_ID, Duration::from_millis(200));
        let result = transport.open(&url).await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(!transport.is_connected());
        let mut events = transport.subscribe(&context()).await.unwrap().unwrap();
        let end = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("reader kept running after a failed open");
        assert!(end.is_none());
    }
}
