//! Agent status conditions derived from the backend host record.
//!
//! Every condition is a pure function of the host (plus the spec approval
//! flag and the outcome of the spec sync). Reasons and messages come from a
//! closed set so tooling can match them exactly.

use assisted_client::{Host, HostStatus, ValidationStatus};
use crds::{Condition, ConditionStatus, ConditionType};

pub const SYNC_OK_REASON: &str = "SyncOK";
pub const SYNC_OK_MSG: &str = "The Spec has been successfully applied";
pub const BACKEND_ERROR_REASON: &str = "BackendError";
pub const BACKEND_ERROR_MSG: &str = "The Spec could not be synced due to backend error:";
pub const INPUT_ERROR_REASON: &str = "InputError";
pub const INPUT_ERROR_MSG: &str = "The Spec could not be synced due to an input error:";

pub const AGENT_READY_REASON: &str = "AgentIsReady";
pub const AGENT_READY_MSG: &str = "The agent is ready";
pub const AGENT_NOT_READY_REASON: &str = "AgentNotReady";
pub const AGENT_NOT_READY_MSG: &str = "The agent is not ready";
pub const AGENT_NOT_APPROVED_REASON: &str = "AgentIsNotApproved";
pub const AGENT_NOT_APPROVED_MSG: &str = "The agent is not approved";
pub const AGENT_ALREADY_INSTALLING_REASON: &str = "AgentAlreadyInstalling";
pub const AGENT_ALREADY_INSTALLING_MSG: &str =
    "The agent cannot begin the installation because it has already started";
pub const AGENT_INSTALLATION_STOPPED_REASON: &str = "AgentInstallationStopped";
pub const AGENT_INSTALLATION_STOPPED_MSG: &str = "The agent installation stopped";

pub const AGENT_CONNECTED_REASON: &str = "AgentIsConnected";
pub const AGENT_CONNECTED_MSG: &str = "The agent's connection to the installation service is unimpaired";
pub const AGENT_DISCONNECTED_REASON: &str = "AgentIsDisconnected";
pub const AGENT_DISCONNECTED_MSG: &str =
    "The agent has not contacted the installation service in some time, user action should be taken";

pub const INSTALLED_REASON: &str = "InstallationCompleted";
pub const INSTALLED_MSG: &str = "The installation has completed:";
pub const INSTALLATION_FAILED_REASON: &str = "InstallationFailed";
pub const INSTALLATION_FAILED_MSG: &str = "The installation has failed:";
pub const INSTALLATION_NOT_STARTED_REASON: &str = "InstallationNotStarted";
pub const INSTALLATION_NOT_STARTED_MSG: &str = "The installation has not yet started";
pub const INSTALLATION_IN_PROGRESS_REASON: &str = "InstallationInProgress";
pub const INSTALLATION_IN_PROGRESS_MSG: &str = "The installation is in progress:";

pub const VALIDATIONS_PASSING_REASON: &str = "ValidationsPassing";
pub const VALIDATIONS_PASSING_MSG: &str = "The agent's validations are passing";
pub const VALIDATIONS_FAILING_REASON: &str = "ValidationsFailing";
pub const VALIDATIONS_FAILING_MSG: &str = "The agent's validations are failing:";
pub const VALIDATIONS_USER_PENDING_REASON: &str = "ValidationsUserPending";
pub const VALIDATIONS_USER_PENDING_MSG: &str = "The agent's validations are pending for user:";
pub const VALIDATIONS_UNKNOWN_REASON: &str = "ValidationsUnknown";
pub const VALIDATIONS_UNKNOWN_MSG: &str = "The agent's validations have not yet been calculated";

pub const BOUND_REASON: &str = "Bound";
pub const BOUND_MSG: &str = "The agent is bound to a cluster deployment";
pub const UNBOUND_REASON: &str = "Unbound";
pub const UNBOUND_MSG: &str = "The agent is not bound to any cluster deployment";
pub const BINDING_REASON: &str = "Binding";
pub const BINDING_MSG: &str = "The agent is being bound to a cluster deployment";
pub const UNBINDING_REASON: &str = "Unbinding";
pub const UNBINDING_MSG: &str = "The agent is being unbound from a cluster deployment";
pub const UNBINDING_PENDING_USER_ACTION_REASON: &str = "UnbindingPendingUserAction";
pub const UNBINDING_PENDING_USER_ACTION_MSG: &str =
    "The agent is being unbound from a cluster deployment, user action needed";

/// Validations that never block installation and are left out of the Validated condition
const NON_BLOCKING_VALIDATIONS: &[&str] = &["ntp-synced", "container-images-available"];

/// Outcome of applying the Agent spec to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    Synced,
    /// Recoverable; the reconcile is retried
    BackendError(String),
    /// Terminal until the spec changes
    InputError(String),
}

pub fn spec_synced(result: &SyncResult) -> Condition {
    match result {
        SyncResult::Synced => Condition::new(
            ConditionType::SpecSynced,
            ConditionStatus::True,
            SYNC_OK_REASON,
            SYNC_OK_MSG,
        ),
        SyncResult::BackendError(err) => Condition::new(
            ConditionType::SpecSynced,
            ConditionStatus::False,
            BACKEND_ERROR_REASON,
            format!("{} {}", BACKEND_ERROR_MSG, err),
        ),
        SyncResult::InputError(err) => Condition::new(
            ConditionType::SpecSynced,
            ConditionStatus::False,
            INPUT_ERROR_REASON,
            format!("{} {}", INPUT_ERROR_MSG, err),
        ),
    }
}

/// Binding transitions override every host-derived condition except Connected
fn binding_override(r#type: ConditionType, status: HostStatus) -> Option<Condition> {
    let (reason, message) = match status {
        HostStatus::Binding => (BINDING_REASON, BINDING_MSG),
        HostStatus::Unbinding | HostStatus::UnbindingPendingUserAction => (UNBINDING_REASON, UNBINDING_MSG),
        _ => return None,
    };
    Some(Condition::new(r#type, ConditionStatus::False, reason, message))
}

pub fn connected(host: &Host) -> Condition {
    if host.status.is_disconnected() {
        Condition::new(
            ConditionType::Connected,
            ConditionStatus::False,
            AGENT_DISCONNECTED_REASON,
            AGENT_DISCONNECTED_MSG,
        )
    } else {
        Condition::new(
            ConditionType::Connected,
            ConditionStatus::True,
            AGENT_CONNECTED_REASON,
            AGENT_CONNECTED_MSG,
        )
    }
}

fn is_installing(status: HostStatus) -> bool {
    matches!(
        status,
        HostStatus::PreparingForInstallation
            | HostStatus::PreparingSuccessful
            | HostStatus::Installing
            | HostStatus::InstallingInProgress
            | HostStatus::InstallingPendingUserAction
            | HostStatus::Resetting
            | HostStatus::ResettingPendingUserAction
    )
}

fn is_stopped(status: HostStatus) -> bool {
    matches!(
        status,
        HostStatus::Installed | HostStatus::AddedToExistingCluster | HostStatus::Error | HostStatus::Cancelled
    )
}

pub fn requirements_met(host: &Host, approved: bool) -> Condition {
    let t = ConditionType::RequirementsMet;
    if let Some(c) = binding_override(t, host.status) {
        return c;
    }
    match host.status {
        HostStatus::Known | HostStatus::KnownUnbound if approved => {
            Condition::new(t, ConditionStatus::True, AGENT_READY_REASON, AGENT_READY_MSG)
        }
        HostStatus::Known | HostStatus::KnownUnbound => Condition::new(
            t,
            ConditionStatus::False,
            AGENT_NOT_APPROVED_REASON,
            AGENT_NOT_APPROVED_MSG,
        ),
        s if is_installing(s) => Condition::new(
            t,
            ConditionStatus::True,
            AGENT_ALREADY_INSTALLING_REASON,
            AGENT_ALREADY_INSTALLING_MSG,
        ),
        s if is_stopped(s) => Condition::new(
            t,
            ConditionStatus::True,
            AGENT_INSTALLATION_STOPPED_REASON,
            AGENT_INSTALLATION_STOPPED_MSG,
        ),
        _ => Condition::new(t, ConditionStatus::False, AGENT_NOT_READY_REASON, AGENT_NOT_READY_MSG),
    }
}

pub fn installed(host: &Host) -> Condition {
    let t = ConditionType::Installed;
    if let Some(c) = binding_override(t, host.status) {
        return c;
    }
    match host.status {
        HostStatus::Installed | HostStatus::AddedToExistingCluster => Condition::new(
            t,
            ConditionStatus::True,
            INSTALLED_REASON,
            format!("{} {}", INSTALLED_MSG, host.status_info),
        ),
        HostStatus::Error | HostStatus::Cancelled => Condition::new(
            t,
            ConditionStatus::False,
            INSTALLATION_FAILED_REASON,
            format!("{} {}", INSTALLATION_FAILED_MSG, host.status_info),
        ),
        s if is_installing(s) => Condition::new(
            t,
            ConditionStatus::False,
            INSTALLATION_IN_PROGRESS_REASON,
            format!("{} {}", INSTALLATION_IN_PROGRESS_MSG, host.status_info),
        ),
        _ => Condition::new(
            t,
            ConditionStatus::False,
            INSTALLATION_NOT_STARTED_REASON,
            INSTALLATION_NOT_STARTED_MSG,
        ),
    }
}

pub fn validated(host: &Host) -> Condition {
    let t = ConditionType::Validated;
    if let Some(c) = binding_override(t, host.status) {
        return c;
    }
    if host.validations_info.is_empty() {
        return Condition::new(
            t,
            ConditionStatus::Unknown,
            VALIDATIONS_UNKNOWN_REASON,
            VALIDATIONS_UNKNOWN_MSG,
        );
    }

    let pending_for_input = host.status == HostStatus::PendingForInput;
    let mut blocking: Vec<_> = host
        .validations_info
        .iter()
        .map(|(_, r)| r)
        .filter(|r| !NON_BLOCKING_VALIDATIONS.contains(&r.id.as_str()))
        .filter(|r| {
            r.status == ValidationStatus::Failure || (pending_for_input && r.status == ValidationStatus::Pending)
        })
        .collect();
    if blocking.is_empty() {
        return Condition::new(
            t,
            ConditionStatus::True,
            VALIDATIONS_PASSING_REASON,
            VALIDATIONS_PASSING_MSG,
        );
    }

    blocking.sort_by(|a, b| a.id.cmp(&b.id));
    let messages = blocking.iter().map(|r| r.message.as_str()).collect::<Vec<_>>().join(",");
    if pending_for_input {
        Condition::new(
            t,
            ConditionStatus::False,
            VALIDATIONS_USER_PENDING_REASON,
            format!("{} {}", VALIDATIONS_USER_PENDING_MSG, messages),
        )
    } else {
        Condition::new(
            t,
            ConditionStatus::False,
            VALIDATIONS_FAILING_REASON,
            format!("{} {}", VALIDATIONS_FAILING_MSG, messages),
        )
    }
}

pub fn bound(host: &Host) -> Condition {
    let t = ConditionType::Bound;
    match host.status {
        HostStatus::Binding => Condition::new(t, ConditionStatus::False, BINDING_REASON, BINDING_MSG),
        HostStatus::Unbinding => Condition::new(t, ConditionStatus::False, UNBINDING_REASON, UNBINDING_MSG),
        HostStatus::UnbindingPendingUserAction => Condition::new(
            t,
            ConditionStatus::False,
            UNBINDING_PENDING_USER_ACTION_REASON,
            UNBINDING_PENDING_USER_ACTION_MSG,
        ),
        s if s.is_unbound() => Condition::new(t, ConditionStatus::False, UNBOUND_REASON, UNBOUND_MSG),
        _ => Condition::new(t, ConditionStatus::True, BOUND_REASON, BOUND_MSG),
    }
}

/// Every host-derived condition, in reporting order
pub fn host_conditions(host: &Host, approved: bool) -> [Condition; 5] {
    [
        connected(host),
        requirements_met(host, approved),
        validated(host),
        installed(host),
        bound(host),
    ]
}
