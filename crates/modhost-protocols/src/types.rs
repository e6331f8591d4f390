//! Common utility types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Metadata map type.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Semantic version.
///
/// Serialized as a plain `"major.minor.patch[-pre]"` string so manifests can
/// write `version = "1.2.0"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: Option<String>,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (core, prerelease) = match s.trim().split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (s.trim(), None),
        };

        let mut parts = core.split('.');
        let mut next = |name: &str| -> Result<u32, String> {
            parts
                .next()
                .unwrap_or("0")
                .parse::<u32>()
                .map_err(|e| format!("invalid {} component in version '{}': {}", name, s, e))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
        })
    }
}

impl TryFrom<String> for Version {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display() {
        assert_eq!(Version::new(1, 2, 3).to_string(), "1.2.3");

        let mut pre = Version::new(2, 0, 0);
        pre.prerelease = Some("beta.1".to_string());
        assert_eq!(pre.to_string(), "2.0.0-beta.1");
    }

    #[test]
    fn test_version_parse() {
        let v: Version = "1.4.2".parse().unwrap();
        assert_eq!(v, Version::new(1, 4, 2));

        let v: Version = "3.1".parse().unwrap();
        assert_eq!(v, Version::new(3, 1, 0));

        let v: Version = "0.9.0-rc1".parse().unwrap();
        assert_eq!(v.prerelease.as_deref(), Some("rc1"));
    }

    #[test]
    fn test_version_parse_invalid() {
        assert!("one.two".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_serializes_as_string() {
        let json = serde_json::to_string(&Version::new(1, 0, 0)).unwrap();
        assert_eq!(json, "\"1.0.0\"");

        let parsed: Version = serde_json::from_str("\"2.5.1\"").unwrap();
        assert_eq!(parsed, Version::new(2, 5, 1));
    }

    #[test]
    fn test_version_default() {
        assert_eq!(Version::default(), Version::new(1, 0, 0));
    }
}
