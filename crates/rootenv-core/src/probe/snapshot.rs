//! Probed environment facts and their classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel for "no trusted version code".
pub const UNKNOWN_VERSION_CODE: i32 = -1;

/// Raw values read from the toolkit before any gating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReadings {
    pub version_string: String,
    pub raw_version_code: i32,
    pub hide_enabled: bool,
    pub has_root: bool,
}

/// Immutable record of the toolkit's state at probe time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Human-readable toolkit version, empty when unknown.
    pub version_string: String,

    /// Trusted version code, or -1.
    pub version_code: i32,

    /// Version code as reported, before gating.
    pub raw_version_code: i32,

    /// Hide feature reported as enabled.
    pub hide_enabled: bool,

    /// Installed, but older than the minimum supported version.
    pub is_unsupported: bool,

    /// Installed, supported and confirmed under root.
    pub is_active: bool,

    /// Outcome of the privilege check taken with this snapshot.
    pub rooted: bool,

    pub probed_at: DateTime<Utc>,
}

impl EnvironmentSnapshot {
    /// Classify raw readings against the minimum supported version code.
    ///
    /// A code at or below `min_version_code`, or any code read without root,
    /// is replaced by [`UNKNOWN_VERSION_CODE`].
    pub fn classify(readings: ProbeReadings, min_version_code: i32) -> Self {
        let raw = readings.raw_version_code;
        let version_code = if raw <= min_version_code || !readings.has_root {
            UNKNOWN_VERSION_CODE
        } else {
            raw
        };

        Self {
            version_string: readings.version_string,
            version_code,
            raw_version_code: raw,
            hide_enabled: readings.hide_enabled,
            is_unsupported: raw > 0 && raw < min_version_code,
            is_active: version_code >= 0,
            rooted: readings.has_root,
            probed_at: Utc::now(),
        }
    }

    /// Snapshot for an environment where nothing could be read.
    pub fn absent() -> Self {
        Self::classify(
            ProbeReadings {
                version_string: String::new(),
                raw_version_code: UNKNOWN_VERSION_CODE,
                hide_enabled: false,
                has_root: false,
            },
            0,
        )
    }

    /// Short label for the support state.
    pub fn state_label(&self) -> &'static str {
        if self.is_active {
            "active"
        } else if self.is_unsupported {
            "unsupported"
        } else if self.raw_version_code > 0 {
            "inactive"
        } else {
            "absent"
        }
    }

    /// One-line description for logs and summary output.
    pub fn summary(&self) -> String {
        let version = if self.version_string.is_empty() {
            "unknown"
        } else {
            &self.version_string
        };
        format!(
            "toolkit {} ({}) | code {} | root: {} | hide: {}",
            version,
            self.state_label(),
            self.version_code,
            if self.rooted { "yes" } else { "no" },
            if self.hide_enabled { "on" } else { "off" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i32 = 19000;

    fn readings(raw: i32, has_root: bool) -> ProbeReadings {
        ProbeReadings {
            version_string: "20.4".to_string(),
            raw_version_code: raw,
            hide_enabled: false,
            has_root,
        }
    }

    #[test]
    fn test_below_minimum_with_root() {
        let snap = EnvironmentSnapshot::classify(readings(MIN - 1, true), MIN);
        assert_eq!(snap.version_code, -1);
        assert!(snap.is_unsupported);
        assert!(!snap.is_active);
        assert_eq!(snap.state_label(), "unsupported");
    }

    #[test]
    fn test_above_minimum_without_root() {
        let snap = EnvironmentSnapshot::classify(readings(MIN + 1, false), MIN);
        assert_eq!(snap.version_code, -1);
        assert!(!snap.is_unsupported);
        assert!(!snap.is_active);
        assert_eq!(snap.state_label(), "inactive");
    }

    #[test]
    fn test_above_minimum_with_root() {
        let snap = EnvironmentSnapshot::classify(readings(MIN + 1, true), MIN);
        assert_eq!(snap.version_code, MIN + 1);
        assert!(snap.is_active);
        assert!(!snap.is_unsupported);
        assert_eq!(snap.state_label(), "active");
    }

    #[test]
    fn test_exactly_minimum_is_untrusted_but_not_unsupported() {
        let snap = EnvironmentSnapshot::classify(readings(MIN, true), MIN);
        assert_eq!(snap.version_code, -1);
        assert!(!snap.is_unsupported);
        assert!(!snap.is_active);
    }

    #[test]
    fn test_absent() {
        let snap = EnvironmentSnapshot::absent();
        assert_eq!(snap.version_code, -1);
        assert!(snap.version_string.is_empty());
        assert_eq!(snap.state_label(), "absent");
        assert!(snap.summary().starts_with("toolkit unknown (absent)"));
    }

    #[test]
    fn test_serializes_snake_case() {
        let snap = EnvironmentSnapshot::classify(readings(MIN + 1, true), MIN);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["version_code"], MIN + 1);
        assert_eq!(json["is_active"], true);
    }
}
