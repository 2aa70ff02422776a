//! Validation results as persisted on clusters and hosts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of a single validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Success,
    Failure,
    Pending,
    Disabled,
    /// Reported by the backend when a check errored internally
    Error,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Success => "success",
            ValidationStatus::Failure => "failure",
            ValidationStatus::Pending => "pending",
            ValidationStatus::Disabled => "disabled",
            ValidationStatus::Error => "error",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub id: String,
    pub status: ValidationStatus,
    pub message: String,
}

impl ValidationResult {
    pub fn new(id: impl Into<String>, status: ValidationStatus, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            message: message.into(),
        }
    }
}

/// Validation results keyed by category, each category ordered by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct ValidationsStatus(pub BTreeMap<String, Vec<ValidationResult>>);

impl ValidationsStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Number of populated (category, id) entries
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Append a result to a category
    pub fn push(&mut self, category: impl Into<String>, result: ValidationResult) {
        self.0.entry(category.into()).or_default().push(result);
    }

    /// Iterate every result with its category
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValidationResult)> {
        self.0
            .iter()
            .flat_map(|(category, results)| results.iter().map(move |r| (category.as_str(), r)))
    }

    /// Find a result by id across all categories
    pub fn get(&self, id: &str) -> Option<&ValidationResult> {
        self.iter().map(|(_, r)| r).find(|r| r.id == id)
    }

    /// Results with the given status, sorted by id
    pub fn with_status(&self, status: ValidationStatus) -> Vec<&ValidationResult> {
        let mut results: Vec<&ValidationResult> =
            self.iter().map(|(_, r)| r).filter(|r| r.status == status).collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validations_status_parses_backend_json() {
        let raw = r#"{"network":[{"id":"machine-cidr-defined","status":"success","message":"ok"}],
                      "hosts-data":[{"id":"sufficient-masters-count","status":"failure","message":"no"}]}"#;
        let parsed: ValidationsStatus = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed.get("sufficient-masters-count").map(|r| r.status),
            Some(ValidationStatus::Failure)
        );
    }

    #[test]
    fn test_with_status_sorts_by_id() {
        let mut v = ValidationsStatus::new();
        v.push("b", ValidationResult::new("zeta", ValidationStatus::Failure, "z"));
        v.push("a", ValidationResult::new("alpha", ValidationStatus::Failure, "a"));
        v.push("a", ValidationResult::new("beta", ValidationStatus::Success, "b"));
        let ids: Vec<&str> = v.with_status(ValidationStatus::Failure).iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_empty_categories_count_as_empty() {
        let mut v = ValidationsStatus::new();
        v.0.insert("network".to_string(), Vec::new());
        assert!(v.is_empty());
        assert_eq!(v.len(), 0);
    }
}
