//! Session lifecycle states, signals and the shared snapshot

use std::fmt;

use tokio::sync::watch;

use crate::protocol::ProtocolVersion;
use crate::transport::CallContext;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing issued yet
    #[default]
    Uninitialized,
    /// Authentication call in flight
    Authenticating,
    /// Token issued, not yet bound to the account
    Authed,
    /// Verify call in flight
    Verifying,
    /// Token bound; events may flow
    Verified,
    /// Token invalidated, terminal
    Released,
    /// A lifecycle call was rejected or the channel failed
    Failed {
        /// What went wrong
        reason: String,
    },
}

impl SessionState {
    /// Whether no further lifecycle call is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Released | SessionState::Failed { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::Authed => write!(f, "authed"),
            SessionState::Verifying => write!(f, "verifying"),
            SessionState::Verified => write!(f, "verified"),
            SessionState::Released => write!(f, "released"),
            SessionState::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// A session token was issued
    Authed,
    /// The token is bound to the account
    Verified,
    /// The token was invalidated
    Released,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Authed => write!(f, "authed"),
            Signal::Verified => write!(f, "verified"),
            Signal::Released => write!(f, "released"),
        }
    }
}

/// Everything readers may observe about the session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current state
    pub state: SessionState,
    /// Session token, present from `Authed` until release
    pub session_key: Option<String>,
    /// Signals raised so far
    pub authed: bool,
    /// See [`Signal::Verified`]
    pub verified: bool,
    /// See [`Signal::Released`]
    pub released: bool,
}

impl SessionSnapshot {
    /// Whether a signal has fired
    pub fn raised(&self, signal: Signal) -> bool {
        match signal {
            Signal::Authed => self.authed,
            Signal::Verified => self.verified,
            Signal::Released => self.released,
        }
    }

    pub(crate) fn raise(&mut self, signal: Signal) {
        match signal {
            Signal::Authed => self.authed = true,
            Signal::Verified => self.verified = true,
            Signal::Released => self.released = true,
        }
    }
}

/// Read-only view of the session for collaborators
///
/// Every outbound call takes a fresh [`CallContext`] from here; the session
/// token itself is only ever written by the state machine.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    snapshots: watch::Receiver<SessionSnapshot>,
    account_id: i64,
    version: ProtocolVersion,
}

impl ContextHandle {
    pub(crate) fn new(
        snapshots: watch::Receiver<SessionSnapshot>,
        account_id: i64,
        version: ProtocolVersion,
    ) -> Self {
        ContextHandle {
            snapshots,
            account_id,
            version,
        }
    }

    /// Snapshot for the next call
    pub fn current(&self) -> CallContext {
        CallContext {
            session_key: self.snapshots.borrow().session_key.clone(),
            account_id: self.account_id,
            version: self.version,
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.snapshots.borrow().state.clone()
    }

    /// Whether a signal has fired
    pub fn raised(&self, signal: Signal) -> bool {
        self.snapshots.borrow().raised(signal)
    }

    /// Bot account
    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    /// Gateway protocol version
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// A receiver that wakes on every session change
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Context handle whose snapshot never changes
    #[cfg(test)]
    pub(crate) fn fixed(session_key: &str, account_id: i64, version: ProtocolVersion) -> Self {
        let snapshot = SessionSnapshot {
            state: SessionState::Verified,
            session_key: Some(session_key.to_string()),
            authed: true,
            verified: true,
            released: false,
        };
        let (_tx, rx) = watch::channel(snapshot);
        ContextHandle::new(rx, account_id, version)
    }
}
