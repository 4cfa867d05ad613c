//! Session lifecycle
//!
//! ```text
//! Uninitialized ─▶ Authenticating ─▶ Authed ─▶ Verifying ─▶ Verified ─▶ Released
//!                        │              │           │           │
//!                        └──────────────┴───────────┴───────────┴──▶ Failed
//! ```
//!
//! In push-only mode the channel handshake jumps straight to `Verified`.

mod machine;
mod state;

pub use machine::{SessionMachine, SignalHandler};
pub use state::{ContextHandle, SessionSnapshot, SessionState, Signal};
