//! Fuzz target for the persisted state document.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rootenv_core::store::PersistedState;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<PersistedState>(data);
});
