//! Event sources feeding the dispatcher
//!
//! Exactly one source runs per bot: the poll loop when the transport has no
//! push channel, the push consumer otherwise. Both stop once the session
//! reaches a terminal state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use crate::outbound::Outbound;
use crate::protocol::{ApiReply, Procedure};
use crate::session::SessionSnapshot;
use crate::transport::EventStream;

/// Default pause between two fetches
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default number of events drained per fetch
pub const DEFAULT_FETCH_COUNT: usize = 10;

fn stopped(session: &watch::Receiver<SessionSnapshot>) -> bool {
    session.borrow().state.is_terminal()
}

/// Hand one event to the dispatcher and let its listeners run on their own
fn deliver(dispatcher: &Dispatcher, event: Value) {
    let dispatched = dispatcher.dispatch(event);
    tokio::spawn(dispatched.finish());
}

/// Fetch queued events, one request at a time, until the session ends
pub async fn run_poll_loop(
    dispatcher: Arc<Dispatcher>,
    outbound: Outbound,
    interval: Duration,
    count: usize,
    mut session: watch::Receiver<SessionSnapshot>,
) {
    info!(?interval, count, "Poll loop started");
    while !stopped(&session) {
        match outbound
            .call(Procedure::FetchMessage, json!({ "count": count }))
            .await
        {
            Ok(ApiReply::Success(Value::Array(events))) => {
                if !events.is_empty() {
                    debug!(events = events.len(), "fetched events");
                }
                for event in events {
                    deliver(&dispatcher, event);
                }
            }
            Ok(ApiReply::Success(other)) => {
                warn!(reply = %other, "Unexpected fetchMessage reply, skipping cycle");
            }
            Ok(ApiReply::Rejected(envelope)) => {
                warn!(code = envelope.code, msg = %envelope.msg, "fetchMessage rejected, skipping cycle");
            }
            Err(e) => {
                warn!(error = %e, "fetchMessage failed, skipping cycle");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!("Poll loop stopped");
}

/// Drain the transport's push stream until it ends or the session ends
pub async fn run_push_consumer(
    dispatcher: Arc<Dispatcher>,
    mut events: EventStream,
    mut session: watch::Receiver<SessionSnapshot>,
) {
    info!("Push consumer started");
    while !stopped(&session) {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => deliver(&dispatcher, event),
                None => {
                    warn!("Push event stream ended");
                    break;
                }
            },
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!("Push consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolVersion;
    use crate::session::{ContextHandle, SessionState};
    use crate::transport::testing::RecordingTransport;
    use tokio::sync::mpsc;

    fn session() -> (watch::Sender<SessionSnapshot>, watch::Receiver<SessionSnapshot>) {
        watch::channel(SessionSnapshot {
            state: SessionState::Verified,
            session_key: Some("S".into()),
            authed: true,
            verified: true,
            released: false,
        })
    }

    fn release(tx: &watch::Sender<SessionSnapshot>) {
        tx.send_modify(|snapshot| {
            snapshot.state = SessionState::Released;
            snapshot.released = true;
        });
    }

    fn outbound(transport: Arc<RecordingTransport>, rx: watch::Receiver<SessionSnapshot>) -> Outbound {
        Outbound::new(transport, ContextHandle::new(rx, 10001, ProtocolVersion::default()))
    }

    #[tokio::test]
    async fn test_poll_loop_dispatches_and_stops_on_release() {
        let transport = RecordingTransport::replying(json!({
            "code": 0,
            "data": [{"type": "BotOnlineEvent", "qq": 10001}]
        }));
        let (tx, rx) = session();
        let outbound = outbound(transport.clone(), rx.clone());
        let dispatcher = Arc::new(Dispatcher::new(outbound.clone()));

        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        dispatcher.on_event(crate::event::EventKind::BotOnline, move |event| {
            let _ = seen_tx.send(event.raw);
            async { Ok(()) }
        });

        let handle = tokio::spawn(run_poll_loop(
            dispatcher,
            outbound,
            Duration::from_millis(10),
            10,
            rx,
        ));

        assert_eq!(seen.recv().await.unwrap()["qq"], 10001);
        release(&tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();

        let (procedure, payload) = transport.calls()[0].clone();
        assert_eq!(procedure, Procedure::FetchMessage);
        assert_eq!(payload["count"], 10);
    }

    #[tokio::test]
    async fn test_poll_loop_survives_rejections() {
        let transport = RecordingTransport::replying(json!({"code": 3, "msg": "session invalid"}));
        let (tx, rx) = session();
        let outbound = outbound(transport.clone(), rx.clone());
        let dispatcher = Arc::new(Dispatcher::new(outbound.clone()));

        let handle = tokio::spawn(run_poll_loop(
            dispatcher,
            outbound,
            Duration::from_millis(5),
            10,
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(60)).await;
        release(&tx);
        handle.await.unwrap();

        assert!(transport.calls().len() > 1);
    }

    #[tokio::test]
    async fn test_push_consumer_drains_stream() {
        let (tx, rx) = session();
        let outbound = outbound(RecordingTransport::replying(json!({"code": 0})), rx.clone());
        let dispatcher = Arc::new(Dispatcher::new(outbound));

        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        dispatcher.on_raw_event("StrangerMessage", move |raw| {
            let _ = seen_tx.send(raw);
            async { Ok(()) }
        });

        let (events_tx, events) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_push_consumer(dispatcher, events, rx));

        events_tx.send(json!({"type": "StrangerMessage", "n": 1})).unwrap();
        events_tx.send(json!({"type": "StrangerMessage", "n": 2})).unwrap();
        assert_eq!(seen.recv().await.unwrap()["n"], 1);
        assert_eq!(seen.recv().await.unwrap()["n"], 2);

        release(&tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("push consumer did not stop")
            .unwrap();
    }
}
