//! # helperd-core
//!
//! Core library for the helper server: the pieces shared between the
//! request-handling daemon and its collaborators.
//!
//! ## Features
//!
//! - **Descriptor ownership**: close-exactly-once handles for descriptors
//!   inherited from the supervisor or produced by raw socket calls
//! - **Service paths**: the per-instance temp directory and the socket
//!   path the front-end connects to
//! - **Application pool interface**: the pool and session traits, pool
//!   options assembled from request headers, and the spawn-failure error
//! - **Process sessions**: a session handle over a spawned backend's
//!   stdin/stdout

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod fd;
pub mod paths;
pub mod pool;

pub use fd::OwnedDescriptor;
pub use pool::{ApplicationPool, PoolError, PoolOptions, PoolSession, PoolStatus};
