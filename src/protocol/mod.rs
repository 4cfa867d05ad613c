//! Gateway protocol - wire vocabulary
//!
//! ## Overview
//!
//! - **Status envelopes**: every reply is `{code, msg, ...}`; code zero is
//!   success and `data`, when present, carries the payload
//! - **Procedures**: the closed catalog of calls the core issues, each with an
//!   HTTP route (poll transport) and a command (push transport)
//! - **Versions**: session routes and the `recall` shape depend on the
//!   gateway's protocol version

pub mod procedure;
pub mod schema;

pub use procedure::{HttpMethod, Procedure};
pub use schema::{
    status_codes, unwrap_envelope, ApiReply, ProtocolVersion, StatusEnvelope,
    DEFAULT_PROTOCOL_VERSION, RECALL_TARGET_SINCE,
};
