//! Fuzz target: `PersistenceManager::restore`
//!
//! Feeds arbitrary bytes in place of the stored snapshot blob.  Restore
//! must return a typed outcome for anything it cannot use, never panic.
//!
//! cargo fuzz run fuzz_snapshot_restore

#![no_main]

use libfuzzer_sys::fuzz_target;
use relaynode::adapters::nvs::NvsAdapter;
use relaynode::app::ports::StoragePort;
use relaynode::persistence::{PersistenceManager, Timestamp};

fuzz_target!(|data: &[u8]| {
    let Ok(mut store) = NvsAdapter::new() else {
        return;
    };
    if store.write("relaynode", "snapshot", data).is_err() {
        return;
    }
    let persistence = PersistenceManager::new(24 * 3_600);
    if let Ok(snapshot) = persistence.restore(&store, Timestamp::Uptime(1)) {
        let _ = persistence.check_age(&snapshot, Timestamp::Epoch(1_700_000_000));
    }
});
