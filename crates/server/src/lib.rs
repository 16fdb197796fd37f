//! Server half of the TCP NAT classifier.
//!
//! Accepts client requests on `(host1, port1)`, echoes the client's
//! observed mapped endpoint, and (unless basic mode or the client
//! asked only for external-address discovery) fires three concurrent
//! probes from the server's other endpoint combinations toward that
//! mapped endpoint to test the client's filtering behavior.

pub mod config;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use server::{start, Handle, StartError};
