//! 记忆层：单次循环调用内的对话记录

pub mod conversation;

pub use conversation::{ActionCall, Message, Role, Transcript};
