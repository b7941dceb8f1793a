//! Subdomain takeover detection: fingerprint-driven verification of dangling
//! CNAMEs, run over a host list by a bounded pool of workers.

pub mod cancel;
pub mod config;
pub mod dns;
mod error;
pub mod fingerprint;
pub mod http;
pub mod log;
pub mod model;
pub mod oracle;
pub mod report;
pub mod scan;
pub mod targets;
pub mod verify;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
