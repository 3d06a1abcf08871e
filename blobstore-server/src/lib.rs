//! The blobstore front-end server.
//!
//! This builds on top of [`blobstore-coordinator`](blobstore_coordinator) and exposes the
//! coordinator read path as an HTTP layer that serves blob payloads, properties, and user
//! metadata directly to external clients.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod endpoints;
pub mod error;
pub mod observability;
pub mod state;
pub mod web;
