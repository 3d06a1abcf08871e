//! Test support for the blobstore crates.
//!
//! This crate hosts the in-process [`TestServer`](server::TestServer), mock replica
//! servers speaking the replica wire protocol, and tracing setup for tests.

pub mod replica;
pub mod server;
pub mod tracing;
