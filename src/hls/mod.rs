//! Sliding-window segment storage and manifest generation

pub mod store;

pub use store::*;
