//! Inbound events: catalog, typed payloads, dispatch and sources
//!
//! ```text
//!  poll loop ─┐
//!             ├─▶ Dispatcher::dispatch ─▶ message / event / raw listeners
//!  push feed ─┘          │
//!                        └─▶ affordances answer through Outbound
//! ```

mod dispatcher;
mod kind;
mod model;
mod source;
mod types;

pub use dispatcher::{
    Dispatched, Dispatcher, EventHandler, ListenScope, MessageHandler, Outcome, RawHandler,
};
pub use kind::{EventKind, MessageKind};
pub use model::{
    DomainEvent, FriendRequest, GroupInvitation, IncomingMessage, MemberJoinRequest,
};
pub use source::{run_poll_loop, run_push_consumer, DEFAULT_FETCH_COUNT, DEFAULT_POLL_INTERVAL};
pub use types::{
    Friend, GroupInfo, GroupMember, MutePayload, NudgePayload, NudgeSubject, Permission,
    RecallPayload, RequestPayload, Sender,
};
