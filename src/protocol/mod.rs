//! WebSocket protocol module

pub mod messages;

pub use messages::*;
