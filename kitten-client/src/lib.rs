//! # kitten-client
//!
//! Client library for kitten RPC.
//!
//! This crate provides:
//! - TCP connect with the HTTP `CONNECT` handshake
//! - Sequence-number correlation of responses to requests
//! - One-way requests and heartbeats
//! - JSON convenience calls

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
