//! Realtime fan-out of conversation events over WebSocket.

pub mod commands;
pub mod connection;
pub mod dispatcher;

pub use commands::run_blocking;
pub use dispatcher::{Dispatcher, Subscription};
