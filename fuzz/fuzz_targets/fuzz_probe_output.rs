//! Fuzz target for toolkit command output parsing.
//!
//! Version output is whatever the installed binary prints; parsing must never
//! panic and a parsed code must round-trip through its decimal text.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rootenv_core::probe::{parse_version_code, parse_version_string};

fuzz_target!(|data: &str| {
    let version = parse_version_string(data, ":");
    assert!(!version.contains(':'));

    let code = parse_version_code(data);
    if code != -1 {
        assert_eq!(parse_version_code(&code.to_string()), code);
    }
});
