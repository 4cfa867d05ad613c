//! Session lifecycle state machine
//!
//! The machine is the only writer of the session token. It publishes every
//! change through a `watch` channel; readers take [`CallContext`] snapshots
//! via [`ContextHandle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::state::{ContextHandle, SessionSnapshot, SessionState, Signal};
use crate::error::{Error, Result};
use crate::protocol::{ApiReply, Procedure, ProtocolVersion};
use crate::transport::{CallContext, Transport};

/// Callback fired when a signal is raised
pub type SignalHandler = Arc<dyn Fn() + Send + Sync>;

/// Drives authenticate → verify → release
pub struct SessionMachine {
    /// Single writer of the session snapshot
    snapshots: watch::Sender<SessionSnapshot>,
    /// Bot account
    account_id: i64,
    /// Gateway protocol version
    version: ProtocolVersion,
    /// Verify key (auth key on 1.x gateways)
    credential: SecretString,
    /// Set when the push channel handshake stood in for verify
    push_only: AtomicBool,
    /// Signal callbacks in registration order
    handlers: Mutex<HashMap<Signal, Vec<SignalHandler>>>,
}

impl SessionMachine {
    /// Create an uninitialized session
    pub fn new(account_id: i64, version: ProtocolVersion, credential: SecretString) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        SessionMachine {
            snapshots,
            account_id,
            version,
            credential,
            push_only: AtomicBool::new(false),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Read-only handle for collaborators
    pub fn context(&self) -> ContextHandle {
        ContextHandle::new(self.snapshots.subscribe(), self.account_id, self.version)
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.snapshots.borrow().state.clone()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Protocol version the session speaks
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Bot account
    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    /// Exchange the credential for a session token
    pub async fn authenticate(&self, transport: &dyn Transport) -> Result<()> {
        self.transition(
            |state| matches!(state, SessionState::Uninitialized),
            SessionState::Authenticating,
            "authenticate",
        )?;

        let payload = if self.version.is_legacy() {
            json!({ "authKey": self.credential.expose_secret() })
        } else {
            json!({ "verifyKey": self.credential.expose_secret() })
        };
        let context = CallContext::anonymous(self.account_id, self.version);

        let reply = match transport
            .call(&context, &Procedure::Authenticate, payload)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "Authentication call failed");
                self.fail(e.to_string());
                return Err(e);
            }
        };

        let session = match reply {
            ApiReply::Success(body) => session_of(&body),
            ApiReply::Rejected(envelope) => {
                error!(code = envelope.code, msg = %envelope.msg, "Gateway refused the credential");
                self.fail(format!("authentication rejected: {}", envelope));
                return Err(Error::Authentication(envelope.to_string()));
            }
        };
        let Some(session) = session else {
            error!("Authentication reply carried no session token");
            self.fail("authentication reply carried no session token");
            return Err(Error::Authentication("reply carried no session token".into()));
        };

        self.snapshots.send_modify(|snapshot| {
            snapshot.state = SessionState::Authed;
            snapshot.session_key = Some(session);
        });
        info!(account = self.account_id, version = %self.version, "Session authenticated");
        self.raise(Signal::Authed);
        Ok(())
    }

    /// Adopt the token carried by a push channel handshake
    ///
    /// The handshake already binds the token to the account, so both
    /// `authed` and `verified` fire.
    pub fn accept_handshake(&self, session: String) -> Result<()> {
        self.transition(
            |state| {
                matches!(
                    state,
                    SessionState::Uninitialized | SessionState::Authenticating
                )
            },
            SessionState::Verified,
            "accept a channel handshake",
        )?;
        self.push_only.store(true, Ordering::SeqCst);
        self.snapshots
            .send_modify(|snapshot| snapshot.session_key = Some(session));
        info!(account = self.account_id, "Session opened by push handshake");
        self.raise(Signal::Authed);
        self.raise(Signal::Verified);
        Ok(())
    }

    /// Bind the token to the account
    pub async fn verify(&self, transport: &dyn Transport) -> Result<()> {
        if self.push_only.load(Ordering::SeqCst)
            && self.state() == SessionState::Verified
        {
            debug!("Session verified by the push handshake, nothing to do");
            return Ok(());
        }

        self.transition(
            |state| matches!(state, SessionState::Authed),
            SessionState::Verifying,
            "verify",
        )?;

        let context = self.context().current();
        let payload = json!({ "qq": self.account_id });
        match self
            .lifecycle_call(transport, &context, Procedure::Verify, payload)
            .await
        {
            Ok(()) => {
                self.snapshots
                    .send_modify(|snapshot| snapshot.state = SessionState::Verified);
                info!(account = self.account_id, "Session verified");
                self.raise(Signal::Verified);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Verify failed");
                self.fail(format!("verify failed: {}", e));
                Err(e)
            }
        }
    }

    /// Invalidate the token
    pub async fn release(&self, transport: &dyn Transport) -> Result<()> {
        self.ensure(
            |state| matches!(state, SessionState::Authed | SessionState::Verified),
            "release",
        )?;

        let context = self.context().current();
        let payload = json!({ "qq": self.account_id });
        match self
            .lifecycle_call(transport, &context, Procedure::Release, payload)
            .await
        {
            Ok(()) => {
                self.snapshots.send_modify(|snapshot| {
                    snapshot.state = SessionState::Released;
                    snapshot.session_key = None;
                });
                info!(account = self.account_id, "Session released");
                self.raise(Signal::Released);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Release failed");
                self.fail(format!("release failed: {}", e));
                Err(e)
            }
        }
    }

    /// Move to `Failed`
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.snapshots.send_modify(|snapshot| {
            snapshot.state = SessionState::Failed { reason };
        });
    }

    /// Register a callback for a signal
    ///
    /// Fires immediately if the signal was already raised.
    pub fn on_signal(&self, signal: Signal, handler: SignalHandler) {
        let raised = {
            let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.entry(signal).or_default().push(handler.clone());
            self.snapshots.borrow().raised(signal)
        };
        if raised {
            handler();
        }
    }

    /// Wait until a signal fires
    ///
    /// Fails if the session reaches `Failed` without raising it.
    pub async fn wait_for(&self, signal: Signal) -> Result<()> {
        let mut snapshots = self.snapshots.subscribe();
        let snapshot = snapshots
            .wait_for(|snapshot| {
                snapshot.raised(signal) || matches!(snapshot.state, SessionState::Failed { .. })
            })
            .await
            .map_err(|_| Error::ChannelClosed("session dropped".into()))?;

        if snapshot.raised(signal) {
            return Ok(());
        }
        Err(Error::InvalidState(format!(
            "session {} before {} was raised",
            snapshot.state, signal
        )))
    }

    async fn lifecycle_call(
        &self,
        transport: &dyn Transport,
        context: &CallContext,
        procedure: Procedure,
        payload: Value,
    ) -> Result<()> {
        transport
            .call(context, &procedure, payload)
            .await?
            .into_result()
            .map(|_| ())
    }

    fn ensure(&self, allowed: impl Fn(&SessionState) -> bool, action: &str) -> Result<()> {
        let state = self.state();
        if allowed(&state) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot {} while the session is {}",
                action, state
            )))
        }
    }

    /// Atomically move from an allowed state to `to`
    fn transition(
        &self,
        allowed: impl Fn(&SessionState) -> bool,
        to: SessionState,
        action: &str,
    ) -> Result<()> {
        let mut from = SessionState::Uninitialized;
        let moved = self.snapshots.send_if_modified(|snapshot| {
            if allowed(&snapshot.state) {
                snapshot.state = to;
                true
            } else {
                from = snapshot.state.clone();
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot {} while the session is {}",
                action, from
            )))
        }
    }

    fn raise(&self, signal: Signal) {
        // Flag and handler list change under one lock so a handler runs once.
        let handlers = {
            let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            self.snapshots.send_modify(|snapshot| snapshot.raise(signal));
            handlers.get(&signal).cloned().unwrap_or_default()
        };
        debug!(%signal, handlers = handlers.len(), "Signal raised");
        for handler in handlers {
            handler();
        }
    }
}

impl std::fmt::Debug for SessionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMachine")
            .field("account_id", &self.account_id)
            .field("version", &self.version)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Session token in an authenticate reply
fn session_of(body: &Value) -> Option<String> {
    match body {
        Value::String(session) => Some(session.clone()),
        other => other
            .get("session")
            .and_then(Value::as_str)
            .map(String::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PollTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn poll(server: &MockServer) -> PollTransport {
        PollTransport::new(Url::parse(&server.uri()).unwrap(), Duration::from_secs(5)).unwrap()
    }

    fn machine(version: ProtocolVersion) -> SessionMachine {
        SessionMachine::new(10001, version, SecretString::from("secret"))
    }

    async fn ok(server: &MockServer, route: &str, body: Value) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_json(json!({"verifyKey": "secret"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "session": "S1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bind"))
            .and(body_json(json!({"sessionKey": "S1", "qq": 10001})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "msg": "success"})))
            .expect(1)
            .mount(&server)
            .await;
        ok(&server, "/release", json!({"code": 0, "msg": "success"})).await;

        let transport = poll(&server);
        let session = machine(ProtocolVersion::default());
        let context = session.context();

        session.authenticate(&transport).await.unwrap();
        assert_eq!(session.state(), SessionState::Authed);
        assert_eq!(context.current().session_key.as_deref(), Some("S1"));

        session.verify(&transport).await.unwrap();
        assert_eq!(context.state(), SessionState::Verified);
        session.wait_for(Signal::Verified).await.unwrap();

        session.release(&transport).await.unwrap();
        assert_eq!(session.state(), SessionState::Released);
        assert!(context.raised(Signal::Released));
        assert!(context.current().session_key.is_none());

        let again = session.release(&transport).await;
        assert!(matches!(again, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_legacy_routes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_json(json!({"authKey": "secret"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "session": "OLD"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_json(json!({"sessionKey": "OLD", "qq": 10001})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "msg": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = poll(&server);
        let session = machine(ProtocolVersion::new(1, 12, 0));
        session.authenticate(&transport).await.unwrap();
        session.verify(&transport).await.unwrap();
        assert_eq!(session.state(), SessionState::Verified);
    }

    #[tokio::test]
    async fn test_rejected_credential_fails_session() {
        let server = MockServer::start().await;
        ok(&server, "/verify", json!({"code": 1, "msg": "wrong verify key"})).await;

        let transport = poll(&server);
        let session = machine(ProtocolVersion::default());

        let result = session.authenticate(&transport).await;
        assert!(matches!(result, Err(Error::Authentication(_))));
        assert!(matches!(session.state(), SessionState::Failed { .. }));
        assert!(session.snapshot().session_key.is_none());
        assert!(session.wait_for(Signal::Authed).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_out_of_order_issues_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .expect(0)
            .mount(&server)
            .await;

        let session = machine(ProtocolVersion::default());
        let result = session.verify(&poll(&server)).await;

        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_rejected_verify_fails_session() {
        let server = MockServer::start().await;
        ok(&server, "/verify", json!({"code": 0, "session": "S"})).await;
        ok(&server, "/bind", json!({"code": 2, "msg": "bot not exist"})).await;

        let transport = poll(&server);
        let session = machine(ProtocolVersion::default());
        session.authenticate(&transport).await.unwrap();

        let result = session.verify(&transport).await;
        assert!(matches!(result, Err(Error::Rejected(env)) if env.code == 2));
        assert!(matches!(session.state(), SessionState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_handshake_bypasses_verify() {
        // Any call against this endpoint would fail, so verify must not issue one.
        let transport = PollTransport::new(
            Url::parse("http://127.0.0.1:9").unwrap(),
            Duration::from_millis(200),
        )
        .unwrap();
        let session = machine(ProtocolVersion::default());

        session.accept_handshake("PUSH".into()).unwrap();
        assert!(session.snapshot().raised(Signal::Authed));
        assert!(session.snapshot().raised(Signal::Verified));

        session.verify(&transport).await.unwrap();
        assert_eq!(session.context().current().session_key.as_deref(), Some("PUSH"));
    }

    #[tokio::test]
    async fn test_signal_handlers_fire_in_order_and_late_registrations_fire_immediately() {
        let server = MockServer::start().await;
        ok(&server, "/verify", json!({"code": 0, "session": "S"})).await;

        let session = machine(ProtocolVersion::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            session.on_signal(Signal::Authed, Arc::new(move || order.lock().unwrap().push(n)));
        }

        session.authenticate(&poll(&server)).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

        let late = Arc::new(AtomicUsize::new(0));
        let counter = late.clone();
        session.on_signal(
            Signal::Authed,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_racing_a_raise_fires_once() {
        for _ in 0..200 {
            let session = Arc::new(machine(ProtocolVersion::default()));
            let fired = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let raiser = {
                let session = session.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    session.raise(Signal::Authed);
                })
            };
            let counter = fired.clone();
            barrier.wait();
            session.on_signal(
                Signal::Authed,
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
            raiser.join().unwrap();

            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }
    }
}
