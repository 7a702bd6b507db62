//! Stream lifecycle management

pub mod controller;

pub use controller::*;
