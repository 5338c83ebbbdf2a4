//! Node identity derived from the ESP32 factory MAC address.
//!
//! Produces a stable node id in the form `RN-XXYYZZ` (last 3 bytes of the
//! 6-byte MAC in uppercase hex).  Used whenever the stored configuration
//! leaves `node_id` empty.

use core::fmt::Write;

use crate::config::Label;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Format: `RN-XXYYZZ` (e.g., `RN-EFCAFE`).
pub fn node_id(mac: &MacAddress) -> Label {
    let mut id = Label::new();
    let _ = write!(id, "RN-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}

/// The configured id, or the MAC-derived one when none is set.
pub fn resolve(configured: &str) -> Label {
    if configured.is_empty() {
        node_id(&read_mac())
    } else {
        crate::config::bounded(configured)
    }
}
