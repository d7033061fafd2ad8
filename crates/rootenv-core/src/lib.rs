//! rootenv core library
//!
//! Answers three questions about a rooted device cheaply and consistently:
//! - Is the privileged toolkit installed, which version, is its hide feature on
//!   (cached probe, see [`probe`])
//! - Is the network reachable right now (see [`connectivity`])
//! - Is this the first run since the device booted (see [`boot`])
//!
//! [`environment::EnvironmentState`] ties them together. The binary entry
//! point is in `main.rs`.

pub mod boot;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod environment;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod probe;
pub mod shell;
pub mod store;

pub use environment::{Availability, EnvironmentState, StatusReport};

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
