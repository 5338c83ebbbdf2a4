//! HMAC-SHA256 signatures for identify and state broadcasts.
//!
//! The tag covers a canonical pipe-separated rendering of the message, not
//! the JSON text, so field order in the encoder does not matter:
//!
//! ```text
//!   identify|<nodeId>
//!   state_update|<seq>|<ts>|<id>:<0|1>:<0|1>,...
//! ```

use core::fmt::Write;

use super::messages::{Signature, SwitchState};

/// `HMAC-SHA256(secret, payload)` as lowercase hex.
pub fn sign(secret: &[u8], payload: &[u8]) -> Signature {
    let tag = hmac_sha256::HMAC::mac(payload, secret);
    let mut out = Signature::new();
    for b in tag {
        // 32 bytes -> 64 hex chars, exactly the capacity.
        let _ = write!(out, "{:02x}", b);
    }
    out
}

pub fn identify_payload(node_id: &str) -> String {
    format!("identify|{node_id}")
}

pub fn state_payload(seq: u32, ts: u64, switches: &[SwitchState]) -> String {
    let mut s = format!("state_update|{seq}|{ts}|");
    for (i, sw) in switches.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        let _ = write!(
            s,
            "{}:{}:{}",
            sw.channel_id,
            u8::from(sw.state),
            u8::from(sw.manual_override)
        );
    }
    s
}
