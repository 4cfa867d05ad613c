//! Message chains and their mirai-code text form

pub mod code;
mod segment;

pub use code::{decode as from_mirai_code, encode as to_mirai_code};
pub use segment::{ForwardNode, MessageChain, MessageSegment};
