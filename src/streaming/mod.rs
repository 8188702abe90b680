//! Client-facing snapshot streaming
//!
//! Length-prefixed JSON frames over TCP, one handler thread per client, with
//! stateful per-client filtering by sensor name or category.

mod client;
mod filter;
mod server;
pub mod wire;

pub use client::{ClientHandler, ClientSettings};
pub use filter::ClientFilter;
pub use server::{spawn_alert_forwarder, spawn_consolidator, StreamingServer};
