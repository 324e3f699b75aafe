//! # kitten-server
//!
//! TCP server for kitten RPC.
//!
//! This crate provides:
//! - HTTP `CONNECT` upgrade of plain TCP connections
//! - Frame decoding with configurable size limits
//! - Method dispatch on the `__METHOD` metadata entry
//! - Heartbeat, one-way and exception handling
//! - YAML and environment configuration

pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod upgrade;

pub use config::{Config, ConfigError, NetworkConfig, RpcConfig};
pub use error::ServerError;
pub use handler::{respond, RequestHandler, Router};
pub use server::{Server, ServerConfig, ServerStats};
pub use upgrade::accept_connect;
