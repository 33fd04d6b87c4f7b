//! The gateway service: HTTP in front, broker RPC behind.
//!
//! Every HTTP request becomes a transaction on the topic exchange: the
//! [`registry::TransactionRegistry`] sets up a transaction-scoped reply
//! queue (consuming *before* anything is published), the
//! [`client::FileClient`] publishes the request frames, and the handler
//! blocks on the correlated response until its derived deadline.

pub mod api;
pub mod client;
mod config;
pub mod registry;
pub mod timeouts;

pub use client::{ClientError, FileClient};
pub use config::GatewayConfig;
