//! # mirai-link
//!
//! Protocol core for driving a chat bot account through a mirai-api-http
//! gateway.
//!
//! ## Features
//!
//! - **Message chains:** typed segments with a lossless mirai-code text form
//! - **Session lifecycle:** authenticate, verify and release as an explicit state machine
//! - **Three transports:** HTTP polling, a duplex WebSocket, or HTTP calls with pushed events
//! - **Event dispatch:** a closed catalog of domain events with reply and request-answer affordances
//!
//! ## Layout
//!
//! ```text
//!   Bot ─┬─ SessionMachine ──watch──▶ ContextHandle ──▶ CallContext
//!        ├─ Transport (poll | push | hybrid)
//!        ├─ Outbound ── sends, recalls, request answers
//!        └─ Dispatcher ◀── poll loop / push consumer
//! ```

pub mod bot;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod message;
pub mod outbound;
pub mod protocol;
pub mod session;
pub mod transport;

pub use bot::Bot;
pub use config::{BotConfig, LogConfig, LogFormat};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventKind, IncomingMessage, ListenScope, MessageKind};
pub use message::{MessageChain, MessageSegment};
pub use outbound::{SentMessage, Target};
pub use protocol::{ApiReply, Procedure, ProtocolVersion, StatusEnvelope};
pub use session::{SessionState, Signal};
pub use transport::TransportMode;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
