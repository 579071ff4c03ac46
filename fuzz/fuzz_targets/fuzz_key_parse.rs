//! Fuzz target for armored secret key loading
//!
//! Exercises `KeyMaterial::load()` and the reader based key source on
//! arbitrary input. Loading must fail cleanly, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use plugsign::{read_armored_from, KeyMaterial};

fuzz_target!(|data: &[u8]| {
    let mut reader = data;
    if let Ok(armored) = read_armored_from(&mut reader) {
        let _ = KeyMaterial::load(&armored, "fuzz");
    }
});
