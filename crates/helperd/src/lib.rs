//! # helperd
//!
//! The helper server sits between a front-end web server and a pool of
//! long-lived application backends. It accepts connections on a local
//! socket, authenticates them with a shared secret, parses the framed
//! request headers, leases a backend session from the application pool,
//! streams the request body to the backend, and streams the backend's
//! CGI-style response back with an HTTP/1.1 status line in front.
//!
//! Concurrency is a fixed set of worker tasks, all accepting from the same
//! listening socket; the number of in-flight connections is bounded by the
//! worker count and each connection is handled sequentially within one
//! worker iteration.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod protocol;
pub mod reporter;
pub mod secret;
pub mod server;
pub mod worker;

pub use config::Config;
pub use secret::SharedSecret;
pub use server::Server;
