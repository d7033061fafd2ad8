//! Property-based tests for snapshot classification and output parsing.

use proptest::prelude::*;
use rootenv_core::probe::{
    parse_version_code, parse_version_string, EnvironmentSnapshot, ProbeReadings,
};

fn readings(raw: i32, has_root: bool) -> ProbeReadings {
    ProbeReadings {
        version_string: String::new(),
        raw_version_code: raw,
        hide_enabled: false,
        has_root,
    }
}

proptest! {
    #[test]
    fn trusted_code_requires_root_and_minimum(
        raw in any::<i32>(),
        min in 1..i32::MAX,
        has_root in any::<bool>(),
    ) {
        let snap = EnvironmentSnapshot::classify(readings(raw, has_root), min);
        if snap.version_code != -1 {
            prop_assert!(has_root);
            prop_assert!(raw > min);
            prop_assert_eq!(snap.version_code, raw);
        }
        prop_assert_eq!(snap.raw_version_code, raw);
    }

    #[test]
    fn active_and_unsupported_are_exclusive(
        raw in -10..100_000i32,
        min in 1..50_000i32,
        has_root in any::<bool>(),
    ) {
        let snap = EnvironmentSnapshot::classify(readings(raw, has_root), min);
        prop_assert!(!(snap.is_active && snap.is_unsupported));
        prop_assert_eq!(snap.is_active, snap.version_code >= 0);
        prop_assert_eq!(snap.is_unsupported, raw > 0 && raw < min);
    }

    #[test]
    fn version_code_parse_matches_integer_text(code in any::<i32>(), pad in "[ \t]{0,3}") {
        let text = format!("{pad}{code}{pad}\n");
        prop_assert_eq!(parse_version_code(&text), code);
    }

    #[test]
    fn version_string_never_contains_delimiter(
        head in "[0-9a-z.]{0,8}",
        tail in "[A-Z:]{0,8}",
    ) {
        let parsed = parse_version_string(&format!("{head}:{tail}\n"), ":");
        prop_assert!(!parsed.contains(':'));
        prop_assert_eq!(parsed, head);
    }
}
