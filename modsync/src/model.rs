//! Core data types shared by the store, catalog, download and install modules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a mod in the remote catalog.
///
/// Real ids are positive. [`ModId::NULL`] marks content that has no parseable
/// identity (drop-ins).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModId(pub u64);

impl ModId {
    /// Sentinel for content without a mod identity.
    pub const NULL: ModId = ModId(0);

    /// Returns true if this is the null sentinel.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ModId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_positive(s).map(ModId)
    }
}

/// Identifier of an uploaded build (modfile) of a mod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub u64);

impl BuildId {
    /// Sentinel for an unknown build.
    pub const NULL: BuildId = BuildId(0);

    /// Returns true if this is the null sentinel.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BuildId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_positive(s).map(BuildId)
    }
}

/// Error returned when a string is not a positive decimal id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a positive integer id")]
pub struct IdParseError(pub String);

fn parse_positive(s: &str) -> Result<u64, IdParseError> {
    // u64::from_str accepts a leading '+', which never appears in ids we write
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdParseError(s.to_string()));
    }
    match s.parse::<u64>() {
        Ok(0) | Err(_) => Err(IdParseError(s.to_string())),
        Ok(v) => Ok(v),
    }
}

/// Key identifying a single transfer: one build of one mod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DownloadKey {
    pub mod_id: ModId,
    pub build_id: BuildId,
}

impl DownloadKey {
    pub fn new(mod_id: ModId, build_id: BuildId) -> Self {
        Self { mod_id, build_id }
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.mod_id, self.build_id)
    }
}

/// Time-limited download URL for a build's binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLocator {
    /// Binary URL.
    pub url: String,
    /// Server timestamp (unix seconds) after which the URL is invalid.
    pub expires_at: i64,
}

impl DownloadLocator {
    /// Returns true if the locator can no longer be used at server time `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Metadata for one uploaded build of a mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub mod_id: ModId,
    pub build_id: BuildId,
    /// Archive file name as uploaded.
    #[serde(default)]
    pub file_name: String,
    /// Version label chosen by the uploader.
    #[serde(default)]
    pub version: Option<String>,
    /// Archive size in bytes.
    pub file_size: u64,
    /// Lowercase hex SHA-256 of the archive, when the catalog provides one.
    #[serde(default)]
    pub file_hash: Option<String>,
    /// Download locator, absent when the catalog withheld it.
    #[serde(default)]
    pub locator: Option<DownloadLocator>,
}

impl BuildRecord {
    pub fn key(&self) -> DownloadKey {
        DownloadKey::new(self.mod_id, self.build_id)
    }

    /// Returns true if the record carries a locator usable at server time `now`.
    pub fn has_valid_locator(&self, now: i64) -> bool {
        self.locator
            .as_ref()
            .map(|l| !l.is_expired(now))
            .unwrap_or(false)
    }
}

/// Mod profile as returned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModRecord {
    pub mod_id: ModId,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    /// Server timestamp of the last profile change.
    #[serde(default)]
    pub date_updated: i64,
    /// Build currently marked live by the author.
    #[serde(default)]
    pub current_build: Option<BuildRecord>,
    /// Popularity statistics, when the catalog included them.
    #[serde(default)]
    pub stats: Option<ModStatistics>,
}

/// Popularity statistics for a mod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModStatistics {
    pub mod_id: ModId,
    #[serde(default)]
    pub downloads_total: u64,
    #[serde(default)]
    pub subscribers_total: u64,
    /// Weighted rating in `0.0..=1.0`.
    #[serde(default)]
    pub rating_weighted: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids() {
        assert_eq!("42".parse::<ModId>().unwrap(), ModId(42));
        assert_eq!("7".parse::<BuildId>().unwrap(), BuildId(7));
        assert!("0".parse::<ModId>().is_err());
        assert!("-3".parse::<ModId>().is_err());
        assert!("+3".parse::<ModId>().is_err());
        assert!("".parse::<BuildId>().is_err());
        assert!("abc".parse::<BuildId>().is_err());
        assert!("99999999999999999999999".parse::<ModId>().is_err());
    }

    #[test]
    fn test_null_ids() {
        assert!(ModId::NULL.is_null());
        assert!(!ModId(1).is_null());
        assert!(BuildId::NULL.is_null());
    }

    #[test]
    fn test_download_key_display() {
        let key = DownloadKey::new(ModId(42), BuildId(7));
        assert_eq!(key.to_string(), "42_7");
    }

    #[test]
    fn test_locator_expiry() {
        let locator = DownloadLocator {
            url: "https://cdn.example.com/a.zip".to_string(),
            expires_at: 1_000,
        };
        assert!(!locator.is_expired(999));
        assert!(locator.is_expired(1_000));
        assert!(locator.is_expired(1_001));
    }

    #[test]
    fn test_build_record_without_locator_is_not_valid() {
        let build = BuildRecord {
            mod_id: ModId(1),
            build_id: BuildId(2),
            file_name: "a.zip".to_string(),
            version: None,
            file_size: 10,
            file_hash: None,
            locator: None,
        };
        assert!(!build.has_valid_locator(0));
    }

    #[test]
    fn test_build_record_json_defaults() {
        let json = r#"{"mod_id":5,"build_id":9,"file_size":100}"#;
        let build: BuildRecord = serde_json::from_str(json).unwrap();
        assert_eq!(build.key(), DownloadKey::new(ModId(5), BuildId(9)));
        assert!(build.file_hash.is_none());
        assert!(build.locator.is_none());
    }
}
