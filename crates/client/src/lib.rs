//! Client half of the TCP NAT classifier.
//!
//! Dials the server once, interprets its response, and (unless in
//! basic mode) listens for the server's follow-up probes to narrow
//! the reported NAT class.

pub mod client;
pub mod config;

pub use client::{run, NatResult};
pub use config::{ClientConfig, ConfigError};
