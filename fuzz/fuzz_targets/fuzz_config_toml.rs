//! Fuzz target for config.toml parsing.
//!
//! Tests that config parsing and validation handle arbitrary input without
//! panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rootenv_core::config::AppConfig;
use std::path::Path;

fuzz_target!(|data: &str| {
    // Should never panic, only return an error
    let _ = AppConfig::from_toml_str(data, Path::new("fuzz.toml"));
});
