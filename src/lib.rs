//! RelayNode firmware library.
//!
//! Exposes the control-loop modules for integration testing and host
//! simulation.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod channel;
pub mod command_queue;
pub mod config;
pub mod debounce;
pub mod error;
pub mod link;
pub mod persistence;
pub mod pins;
pub mod quiet_window;
pub mod rate_limit;
pub mod scheduler;

pub mod adapters;
pub mod drivers;
