//! This is a collection of types shared among the blobstore crates.
//!
//! It contains the blob identifier as well as the cluster topology types used by both the
//! coordinator and the server/test components.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod blob_id;
mod cluster;

pub use blob_id::*;
pub use cluster::*;
