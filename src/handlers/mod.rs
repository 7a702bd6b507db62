//! Handler modules

pub mod connection;
pub mod rooms;
pub mod streams;

pub use connection::*;
pub use rooms::*;
pub use streams::*;
