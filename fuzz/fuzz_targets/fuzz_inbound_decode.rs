//! Fuzz target: `Inbound::decode`
//!
//! Coordinator frames arrive as untrusted text.  Decoding must never panic,
//! and a decoded switch command always names a channel the wire format can
//! carry.
//!
//! cargo fuzz run fuzz_inbound_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use relaynode::link::messages::Inbound;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    if let Ok(Inbound::Error { message }) = Inbound::decode(text) {
        assert!(message.len() <= 64);
    }
});
