//! Typed forms of the free-text JSON fields an Agent spec may carry.

use serde::{Deserialize, Serialize};

/// Extra coreos-installer arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct InstallerArgs(pub Vec<String>);

impl InstallerArgs {
    /// Parse a JSON list of strings. Blank input means "no arguments requested".
    pub fn parse(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<Vec<String>>(raw).map(|args| Some(Self(args)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Same arguments regardless of order
    pub fn equivalent(&self, other: &InstallerArgs) -> bool {
        let mut mine = self.0.clone();
        let mut theirs = other.0.clone();
        mine.sort();
        theirs.sort();
        mine == theirs
    }
}

/// Ignition config overrides, kept as a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct IgnitionOverrides(serde_json::Value);

impl IgnitionOverrides {
    /// Parse a JSON document. Blank input means "no overrides requested".
    pub fn parse(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<serde_json::Value>(raw).map(|v| Some(Self(v)))
    }

    /// True when `raw` holds the same JSON document
    pub fn matches(&self, raw: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(raw).is_ok_and(|other| other == self.0)
    }

    pub fn to_json_string(&self) -> String {
        self.0.to_string()
    }
}
