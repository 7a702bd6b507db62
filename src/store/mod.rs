//! Persistent store access

pub mod pool;
pub mod queries;

pub use pool::*;
