//! The filemanager service: a topic consumer performing file persistence.
//!
//! One durable queue per operation, prefetch 1, manual acknowledgement.
//! Responses are published on transaction-scoped routing keys; the service
//! never talks to the gateway directly.

mod config;
mod diagnose;
mod handlers;
mod ops;
mod server;

pub use config::FileManagerConfig;
pub use handlers::FileManager;
pub use server::{SERVICE_NAME, run};
