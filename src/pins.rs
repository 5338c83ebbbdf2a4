//! GPIO assignments for the eight-relay classroom board.
//!
//! Single source of truth for the factory channel map: the default
//! [`NodeConfig`](crate::config::NodeConfig) references this module rather
//! than hard-coding pin numbers.  Boards with a different layout override
//! the map through the stored config.

// ---------------------------------------------------------------------------
// Relay outputs (opto-isolated relay module, active LOW)
// ---------------------------------------------------------------------------

/// Relay coil drive pins, in channel order.
pub const RELAY_GPIOS: [i32; 8] = [4, 16, 17, 5, 19, 18, 21, 22];

// ---------------------------------------------------------------------------
// Manual wall switches (internal pull-up, closed = LOW)
// ---------------------------------------------------------------------------

/// Wall switch sense pins, in channel order.
///
/// GPIO 12 is a strapping pin; the switch on channel 4 must be open at
/// power-on or the flash voltage is mis-selected.
pub const SWITCH_GPIOS: [i32; 8] = [25, 27, 32, 33, 12, 14, 13, 15];

