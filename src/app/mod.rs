//! Application core: pure domain logic, zero direct I/O.
//!
//! This module ties together the RelayNode rules: manual arbitration,
//! remote command queueing, quiet-window deferral, snapshots and the
//! coordinator link.  All interaction with hardware happens through
//! **port traits** defined in [`ports`], keeping this layer fully testable
//! without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
