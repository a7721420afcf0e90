//! Runlet library
//!
//! Core components of the runlet server: the per-user process manager, the
//! certificate-based identity layer and the mutual-TLS HTTP API in front of
//! them.

pub mod api;
pub mod auth;
pub mod config;
pub mod process;
pub mod server;
pub mod tls;
