//! Status conditions
//!
//! Conditions are upserted by type: a resource never carries two entries of the
//! same `ConditionType`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types reported on an `Agent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionType {
    /// The spec was applied to the backend
    SpecSynced,
    /// The host is talking to the backend
    Connected,
    /// The host may begin installation
    RequirementsMet,
    /// Host validations are passing
    Validated,
    /// Installation progress of the host
    Installed,
    /// The host is bound to a cluster
    Bound,
}

impl ConditionType {
    /// All condition types in the order they are reported
    pub const ALL: [ConditionType; 6] = [
        ConditionType::SpecSynced,
        ConditionType::Connected,
        ConditionType::RequirementsMet,
        ConditionType::Validated,
        ConditionType::Installed,
        ConditionType::Bound,
    ];
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionType::SpecSynced => "SpecSynced",
            ConditionType::Connected => "Connected",
            ConditionType::RequirementsMet => "RequirementsMet",
            ConditionType::Validated => "Validated",
            ConditionType::Installed => "Installed",
            ConditionType::Bound => "Bound",
        };
        write!(f, "{s}")
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not enough information
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A single status condition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub r#type: ConditionType,

    /// Condition status
    pub status: ConditionStatus,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Create a condition without a transition time
    pub fn new(
        r#type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    /// True when status, reason and message match, ignoring timestamps
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Find the condition of a given type.
pub fn find_condition(conditions: &[Condition], r#type: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Upsert a condition by type.
///
/// The transition time is kept when the status did not change. Returns true
/// when anything observable changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition, now: DateTime<Utc>) -> bool {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            if existing.same_state(&condition) {
                return false;
            }
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                Some(now)
            };
            *existing = condition;
            true
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
            true
        }
    }
}
