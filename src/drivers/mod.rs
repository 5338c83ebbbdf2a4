//! Peripheral drivers: relay coils, wall switch inputs, task watchdog.

pub mod manual_input;
pub mod relay;
pub mod watchdog;
