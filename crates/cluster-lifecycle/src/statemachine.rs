//! Cluster status transition table
//!
//! Every status change of a cluster goes through `cluster_table`. Guards are
//! named predicates over `ClusterContext`; the action tag of each rule tells
//! `plan_update` which fields the transition writes.

use crate::config::{self, LifecycleConfig};
use crate::fsm::{Machine, Predicate, TransitionError, TransitionRule, TransitionTable};
use crate::progress;
use crate::store::ClusterUpdate;
use crate::validations;
use assisted_client::{
    Cluster, ClusterStatus, HostRole, HostStatus, LogsState, PreparationStatus, ValidationsStatus,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Transition verbs of the cluster machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionType {
    /// New day-1 cluster
    RegisterCluster,
    /// New day-2 cluster importing an installed one
    RegisterAddHostsCluster,
    /// Periodic or on-demand re-evaluation
    RefreshStatus,
    /// Start of installation preparation
    PrepareForInstallation,
    /// User cancellation
    CancelInstallation,
    /// User reset back to insufficient
    ResetCluster,
    /// Installer reported the final outcome
    CompleteInstallation,
}

impl TransitionType {
    /// Every transition type
    pub const ALL: [TransitionType; 7] = [
        TransitionType::RegisterCluster,
        TransitionType::RegisterAddHostsCluster,
        TransitionType::RefreshStatus,
        TransitionType::PrepareForInstallation,
        TransitionType::CancelInstallation,
        TransitionType::ResetCluster,
        TransitionType::CompleteInstallation,
    ];
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionType::RegisterCluster => "RegisterCluster",
            TransitionType::RegisterAddHostsCluster => "RegisterAddHostsCluster",
            TransitionType::RefreshStatus => "RefreshStatus",
            TransitionType::PrepareForInstallation => "PrepareForInstallation",
            TransitionType::CancelInstallation => "CancelInstallation",
            TransitionType::ResetCluster => "ResetCluster",
            TransitionType::CompleteInstallation => "CompleteInstallation",
        };
        f.write_str(name)
    }
}

/// Snapshot the guards are evaluated against
#[derive(Debug, Clone)]
pub struct ClusterContext {
    /// Cluster as stored before the transition
    pub cluster: Cluster,
    /// Validation result of this refresh; defaults to the stored one
    pub validations: ValidationsStatus,
    /// Timeouts and thresholds
    pub config: LifecycleConfig,
    /// Evaluation time
    pub now: DateTime<Utc>,
    /// Caller supplied reason (cancel, reset, completion)
    pub reason: String,
    /// Outcome reported by the installer on completion
    pub success: bool,
}

impl ClusterContext {
    /// Context with the stored validations, no reason and a failed outcome
    pub fn new(cluster: Cluster, config: LifecycleConfig, now: DateTime<Utc>) -> Self {
        let validations = cluster.validations_info.clone();
        Self {
            cluster,
            validations,
            config,
            now,
            reason: String::new(),
            success: false,
        }
    }

    #[must_use]
    pub fn with_validations(mut self, validations: ValidationsStatus) -> Self {
        self.validations = validations;
        self
    }

    /// Set the caller supplied reason
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the installer reported outcome
    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    fn elapsed(&self, since: Option<DateTime<Utc>>, limit: Duration) -> bool {
        since.is_some_and(|at| config::after(at, limit) < self.now)
    }
}

/// How the status info of the destination is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusInfo {
    /// The given text
    Fixed(&'static str),
    /// Leave the stored status info untouched
    Keep,
    /// Caller reason, or the given text when the reason is empty
    ReasonOr(&'static str),
    /// Stored preparation failure reason behind a fixed prefix
    PreparationFailure,
}

/// Fields written besides status and status info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostEffect {
    /// Nothing beyond status
    None,
    /// Log collection gave up
    MarkLogsTimeout,
    /// Preparation timestamps and state
    StartPreparing,
    /// Install start time
    InstallationStarted,
    /// Progress and log state cleared
    ResetProgress,
    /// Install completion time and metrics
    Complete,
}

/// Action tag of a cluster rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterAction {
    /// How the status info is derived
    pub status_info: StatusInfo,
    /// Extra fields to write
    pub effect: PostEffect,
}

impl ClusterAction {
    const fn info(text: &'static str) -> Self {
        Self {
            status_info: StatusInfo::Fixed(text),
            effect: PostEffect::None,
        }
    }

    const fn keep() -> Self {
        Self {
            status_info: StatusInfo::Keep,
            effect: PostEffect::None,
        }
    }

    const fn with(status_info: StatusInfo, effect: PostEffect) -> Self {
        Self { status_info, effect }
    }
}

/// Type family of the cluster machine
#[derive(Debug)]
pub struct ClusterMachine;

impl Machine for ClusterMachine {
    type Type = TransitionType;
    type State = ClusterStatus;
    type Context = ClusterContext;
    type Action = ClusterAction;
}

/// Status info: insufficient
pub const INFO_INSUFFICIENT: &str = "Cluster is not ready for install";
/// Status info: ready
pub const INFO_READY: &str = "Cluster ready to be installed";
/// Status info: pending for input
pub const INFO_PENDING_FOR_INPUT: &str = "User input required";
/// Status info: preparing
pub const INFO_PREPARING: &str = "Preparing cluster for installation";
/// Status info: installing
pub const INFO_INSTALLING: &str = "Installation in progress";
/// Status info: pending user action
pub const INFO_PENDING_USER_ACTION: &str = "Cluster has hosts with wrong boot order";
/// Status info: finalizing
pub const INFO_FINALIZING: &str = "Finalizing cluster installation";
/// Status info: installed
pub const INFO_INSTALLED: &str = "Cluster is installed";
/// Status info: adding hosts
pub const INFO_ADDING_HOSTS: &str = "cluster is adding hosts to existing OCP cluster";
/// Status info: install timeout
pub const INFO_INSTALL_TIMEOUT: &str = "Timeout while waiting for cluster installation to complete";
/// Status info: hosts in error
pub const INFO_HOSTS_IN_ERROR: &str = "cluster has hosts in error";
/// Status info: finalizing timeout
pub const INFO_FINALIZING_TIMEOUT: &str = "Timeout while waiting for cluster version to be available";
/// Status info: preparing timeout
pub const INFO_PREPARING_TIMEOUT: &str = "Preparing for installation was timed out for the cluster";
/// Status info: preparation failed
pub const INFO_PREPARATION_FAILED: &str = "Cluster preparation for installation failed";
/// Status info: cancelled
pub const INFO_CANCELLED: &str = "Installation was cancelled by user";
/// Status info: reset
pub const INFO_RESET: &str = "Reset cluster installation";
/// Status info: installation failed
pub const INFO_INSTALLATION_FAILED: &str = "Cluster installation failed";

const MIN_WORKERS_FOR_INSTALLED: usize = 2;

fn is_worker(role: HostRole) -> bool {
    role == HostRole::Worker
}

struct HostCounts {
    masters: usize,
    masters_installed: usize,
    masters_in_error: usize,
    workers: usize,
    workers_installed: usize,
    workers_in_error: usize,
}

impl HostCounts {
    fn of(cluster: &Cluster) -> Self {
        let mut counts = HostCounts {
            masters: 0,
            masters_installed: 0,
            masters_in_error: 0,
            workers: 0,
            workers_installed: 0,
            workers_in_error: 0,
        };
        for host in &cluster.hosts {
            let installed = host.status == HostStatus::Installed;
            let failed = host.status == HostStatus::Error;
            if is_worker(host.effective_role()) {
                counts.workers += 1;
                counts.workers_installed += usize::from(installed);
                counts.workers_in_error += usize::from(failed);
            } else {
                counts.masters += 1;
                counts.masters_installed += usize::from(installed);
                counts.masters_in_error += usize::from(failed);
            }
        }
        counts
    }

    fn required_workers(&self) -> usize {
        self.workers.min(MIN_WORKERS_FOR_INSTALLED)
    }
}

fn required_input_missing(ctx: &ClusterContext) -> bool {
    validations::is_required_input_missing(&ctx.validations)
}

fn all_validations_pass(ctx: &ClusterContext) -> bool {
    validations::all_pass(&ctx.validations)
}

fn preparing_timed_out(ctx: &ClusterContext) -> bool {
    ctx.elapsed(ctx.cluster.status_updated_at, ctx.config.prepare_timeout)
}

fn preparation_failed(ctx: &ClusterContext) -> bool {
    ctx.cluster.last_installation_preparation == Some(PreparationStatus::Failed)
}

fn preparation_succeeded(ctx: &ClusterContext) -> bool {
    ctx.cluster.last_installation_preparation == Some(PreparationStatus::Success)
        && ctx
            .cluster
            .hosts
            .iter()
            .all(|h| h.status == HostStatus::PreparingSuccessful)
}

fn installation_timed_out(ctx: &ClusterContext) -> bool {
    ctx.elapsed(ctx.cluster.install_started_at, ctx.config.install_timeout)
}

fn finalizing_timed_out(ctx: &ClusterContext) -> bool {
    ctx.elapsed(ctx.cluster.status_updated_at, ctx.config.finalizing_timeout)
}

fn hosts_in_error(ctx: &ClusterContext) -> bool {
    let counts = HostCounts::of(&ctx.cluster);
    counts.masters_in_error > 0
        || (counts.workers_in_error > 0
            && counts.workers - counts.workers_in_error < counts.required_workers())
}

fn pending_user_action(ctx: &ClusterContext) -> bool {
    ctx.cluster
        .hosts
        .iter()
        .any(|h| h.status == HostStatus::InstallingPendingUserAction)
}

fn enough_hosts_installed(ctx: &ClusterContext) -> bool {
    let counts = HostCounts::of(&ctx.cluster);
    counts.masters > 0
        && counts.masters_installed == counts.masters
        && counts.workers_installed >= counts.required_workers()
}

fn log_collection_timed_out(ctx: &ClusterContext) -> bool {
    let cluster = &ctx.cluster;
    if matches!(cluster.logs_info, Some(LogsState::Completed | LogsState::Timeout)) {
        return false;
    }
    match cluster.controller_logs_started_at {
        Some(started) => ctx.elapsed(Some(started), ctx.config.log_collection_timeout),
        None => ctx.elapsed(cluster.status_updated_at, ctx.config.log_pending_timeout),
    }
}

fn success(ctx: &ClusterContext) -> bool {
    ctx.success
}

/// Guard `is_required_input_missing`
pub const IS_REQUIRED_INPUT_MISSING: Predicate<ClusterContext> =
    Predicate::new("is_required_input_missing", required_input_missing);
/// Guard `all_validations_pass`
pub const ALL_VALIDATIONS_PASS: Predicate<ClusterContext> =
    Predicate::new("all_validations_pass", all_validations_pass);
/// Guard `is_preparing_timed_out`
pub const IS_PREPARING_TIMED_OUT: Predicate<ClusterContext> =
    Predicate::new("is_preparing_timed_out", preparing_timed_out);
/// Guard `is_preparation_failed`
pub const IS_PREPARATION_FAILED: Predicate<ClusterContext> =
    Predicate::new("is_preparation_failed", preparation_failed);
/// Guard `is_preparation_succeeded`
pub const IS_PREPARATION_SUCCEEDED: Predicate<ClusterContext> =
    Predicate::new("is_preparation_succeeded", preparation_succeeded);
/// Guard `is_installation_timed_out`
pub const IS_INSTALLATION_TIMED_OUT: Predicate<ClusterContext> =
    Predicate::new("is_installation_timed_out", installation_timed_out);
/// Guard `is_finalizing_timed_out`
pub const IS_FINALIZING_TIMED_OUT: Predicate<ClusterContext> =
    Predicate::new("is_finalizing_timed_out", finalizing_timed_out);
/// Guard `has_hosts_in_error`
pub const HAS_HOSTS_IN_ERROR: Predicate<ClusterContext> = Predicate::new("has_hosts_in_error", hosts_in_error);
/// Guard `has_pending_user_action`
pub const HAS_PENDING_USER_ACTION: Predicate<ClusterContext> =
    Predicate::new("has_pending_user_action", pending_user_action);
/// Guard `enough_hosts_installed`
pub const ENOUGH_HOSTS_INSTALLED: Predicate<ClusterContext> =
    Predicate::new("enough_hosts_installed", enough_hosts_installed);
/// Guard `is_log_collection_timed_out`
pub const IS_LOG_COLLECTION_TIMED_OUT: Predicate<ClusterContext> =
    Predicate::new("is_log_collection_timed_out", log_collection_timed_out);
/// Guard `is_success`
pub const IS_SUCCESS: Predicate<ClusterContext> = Predicate::new("is_success", success);

/// Statuses in which an installation is running
pub const INSTALLATION_STATUSES: [ClusterStatus; 4] = [
    ClusterStatus::PreparingForInstallation,
    ClusterStatus::Installing,
    ClusterStatus::InstallingPendingUserAction,
    ClusterStatus::Finalizing,
];

/// Build the cluster transition table
pub fn cluster_table() -> Result<TransitionTable<ClusterMachine>, TransitionError> {
    use ClusterStatus::*;
    use TransitionType::*;

    let mut table: TransitionTable<ClusterMachine> = TransitionTable::new();
    let mut add = |transition: TransitionType,
                   sources: &[Option<ClusterStatus>],
                   guards: Vec<Predicate<ClusterContext>>,
                   destination: ClusterStatus,
                   action: ClusterAction| {
        table.register(TransitionRule::new(transition, sources.to_vec(), guards, destination, action))
    };

    add(RegisterCluster, &[None], vec![], Insufficient, ClusterAction::info(INFO_INSUFFICIENT))?;
    add(RegisterAddHostsCluster, &[None], vec![], AddingHosts, ClusterAction::info(INFO_ADDING_HOSTS))?;

    let pre_install = [Some(PendingForInput), Some(Insufficient), Some(Ready)];
    add(
        RefreshStatus,
        &pre_install,
        vec![IS_REQUIRED_INPUT_MISSING],
        PendingForInput,
        ClusterAction::info(INFO_PENDING_FOR_INPUT),
    )?;
    add(
        RefreshStatus,
        &pre_install,
        vec![IS_REQUIRED_INPUT_MISSING.not(), ALL_VALIDATIONS_PASS.not()],
        Insufficient,
        ClusterAction::info(INFO_INSUFFICIENT),
    )?;
    add(
        RefreshStatus,
        &pre_install,
        vec![IS_REQUIRED_INPUT_MISSING.not(), ALL_VALIDATIONS_PASS],
        Ready,
        ClusterAction::info(INFO_READY),
    )?;

    let preparing = [Some(PreparingForInstallation)];
    add(
        RefreshStatus,
        &preparing,
        vec![IS_PREPARING_TIMED_OUT],
        Ready,
        ClusterAction::info(INFO_PREPARING_TIMEOUT),
    )?;
    add(
        RefreshStatus,
        &preparing,
        vec![IS_PREPARING_TIMED_OUT.not(), IS_PREPARATION_FAILED],
        Ready,
        ClusterAction::with(StatusInfo::PreparationFailure, PostEffect::None),
    )?;
    add(
        RefreshStatus,
        &preparing,
        vec![IS_PREPARING_TIMED_OUT.not(), IS_PREPARATION_FAILED.not(), IS_PREPARATION_SUCCEEDED],
        Installing,
        ClusterAction::with(StatusInfo::Fixed(INFO_INSTALLING), PostEffect::InstallationStarted),
    )?;
    add(
        RefreshStatus,
        &preparing,
        vec![
            IS_PREPARING_TIMED_OUT.not(),
            IS_PREPARATION_FAILED.not(),
            IS_PREPARATION_SUCCEEDED.not(),
        ],
        PreparingForInstallation,
        ClusterAction::keep(),
    )?;

    let installing = [Some(Installing), Some(InstallingPendingUserAction)];
    add(
        RefreshStatus,
        &installing,
        vec![IS_INSTALLATION_TIMED_OUT],
        Error,
        ClusterAction::info(INFO_INSTALL_TIMEOUT),
    )?;
    add(
        RefreshStatus,
        &installing,
        vec![IS_INSTALLATION_TIMED_OUT.not(), HAS_HOSTS_IN_ERROR],
        Error,
        ClusterAction::info(INFO_HOSTS_IN_ERROR),
    )?;
    add(
        RefreshStatus,
        &installing,
        vec![IS_INSTALLATION_TIMED_OUT.not(), HAS_HOSTS_IN_ERROR.not(), HAS_PENDING_USER_ACTION],
        InstallingPendingUserAction,
        ClusterAction::info(INFO_PENDING_USER_ACTION),
    )?;
    add(
        RefreshStatus,
        &installing,
        vec![
            IS_INSTALLATION_TIMED_OUT.not(),
            HAS_HOSTS_IN_ERROR.not(),
            HAS_PENDING_USER_ACTION.not(),
            ENOUGH_HOSTS_INSTALLED,
        ],
        Finalizing,
        ClusterAction::info(INFO_FINALIZING),
    )?;
    add(
        RefreshStatus,
        &installing,
        vec![
            IS_INSTALLATION_TIMED_OUT.not(),
            HAS_HOSTS_IN_ERROR.not(),
            HAS_PENDING_USER_ACTION.not(),
            ENOUGH_HOSTS_INSTALLED.not(),
        ],
        Installing,
        ClusterAction::info(INFO_INSTALLING),
    )?;

    add(
        RefreshStatus,
        &[Some(Finalizing)],
        vec![IS_FINALIZING_TIMED_OUT],
        Error,
        ClusterAction::info(INFO_FINALIZING_TIMEOUT),
    )?;
    add(
        RefreshStatus,
        &[Some(Finalizing)],
        vec![IS_FINALIZING_TIMED_OUT.not()],
        Finalizing,
        ClusterAction::keep(),
    )?;

    add(
        RefreshStatus,
        &[Some(Error)],
        vec![IS_LOG_COLLECTION_TIMED_OUT],
        Error,
        ClusterAction::with(StatusInfo::Keep, PostEffect::MarkLogsTimeout),
    )?;
    add(
        RefreshStatus,
        &[Some(Error)],
        vec![IS_LOG_COLLECTION_TIMED_OUT.not()],
        Error,
        ClusterAction::keep(),
    )?;
    add(
        RefreshStatus,
        &[Some(Cancelled)],
        vec![IS_LOG_COLLECTION_TIMED_OUT],
        Cancelled,
        ClusterAction::with(StatusInfo::Keep, PostEffect::MarkLogsTimeout),
    )?;
    add(
        RefreshStatus,
        &[Some(Cancelled)],
        vec![IS_LOG_COLLECTION_TIMED_OUT.not()],
        Cancelled,
        ClusterAction::keep(),
    )?;
    add(RefreshStatus, &[Some(Installed)], vec![], Installed, ClusterAction::keep())?;
    add(RefreshStatus, &[Some(AddingHosts)], vec![], AddingHosts, ClusterAction::keep())?;

    add(
        PrepareForInstallation,
        &[Some(Ready)],
        vec![],
        PreparingForInstallation,
        ClusterAction::with(StatusInfo::Fixed(INFO_PREPARING), PostEffect::StartPreparing),
    )?;

    add(
        CancelInstallation,
        &[
            Some(PreparingForInstallation),
            Some(Installing),
            Some(InstallingPendingUserAction),
            Some(Finalizing),
            Some(Error),
            Some(Cancelled),
        ],
        vec![],
        Cancelled,
        ClusterAction::with(StatusInfo::ReasonOr(INFO_CANCELLED), PostEffect::None),
    )?;

    add(
        ResetCluster,
        &[
            Some(PreparingForInstallation),
            Some(Installing),
            Some(InstallingPendingUserAction),
            Some(Error),
            Some(Cancelled),
        ],
        vec![],
        Insufficient,
        ClusterAction::with(StatusInfo::ReasonOr(INFO_RESET), PostEffect::ResetProgress),
    )?;

    add(
        CompleteInstallation,
        &[Some(Finalizing)],
        vec![IS_SUCCESS],
        Installed,
        ClusterAction::with(StatusInfo::ReasonOr(INFO_INSTALLED), PostEffect::Complete),
    )?;
    add(
        CompleteInstallation,
        &[Some(Finalizing)],
        vec![IS_SUCCESS.not()],
        Error,
        ClusterAction::with(StatusInfo::ReasonOr(INFO_INSTALLATION_FAILED), PostEffect::Complete),
    )?;

    Ok(table)
}

fn status_info(ctx: &ClusterContext, info: StatusInfo) -> Option<String> {
    match info {
        StatusInfo::Keep => None,
        StatusInfo::Fixed(text) => Some(text.to_string()),
        StatusInfo::ReasonOr(default) if ctx.reason.is_empty() => Some(default.to_string()),
        StatusInfo::ReasonOr(_) => Some(ctx.reason.clone()),
        StatusInfo::PreparationFailure => {
            let reason = &ctx.cluster.last_installation_preparation_reason;
            if reason.is_empty() {
                Some(INFO_PREPARATION_FAILED.to_string())
            } else {
                Some(format!("{}: {}", INFO_PREPARATION_FAILED, reason))
            }
        }
    }
}

/// Fields a rule writes, reduced to the ones that actually change. An
/// empty result means the transition is a no-op for the store.
pub fn plan_update(
    ctx: &ClusterContext,
    current: Option<ClusterStatus>,
    rule: &TransitionRule<ClusterMachine>,
) -> ClusterUpdate {
    let cluster = &ctx.cluster;
    let mut update = ClusterUpdate::default();

    if current != Some(rule.destination) {
        update.status = Some(rule.destination);
    }
    if let Some(info) = status_info(ctx, rule.action.status_info) {
        if current.is_none() || info != cluster.status_info {
            update.status_info = Some(info);
        }
    }

    match rule.action.effect {
        PostEffect::None => {}
        PostEffect::MarkLogsTimeout => {
            update.logs_info = Some(Some(LogsState::Timeout));
        }
        PostEffect::StartPreparing => {
            update.last_installation_preparation = Some(PreparationStatus::Preparing);
            update.last_installation_preparation_reason = Some(String::new());
            update.progress = Some(Default::default());
            update.install_started_at = Some(Some(ctx.now));
            update.install_completed_at = Some(None);
            update.controller_logs_started_at = Some(None);
            update.controller_logs_collected_at = Some(None);
            update.logs_info = Some(None);
        }
        PostEffect::InstallationStarted => {
            let mut progress = cluster.progress;
            progress.preparing_stage_percentage = 100;
            progress.total_percentage = progress
                .total_percentage
                .max((progress::WEIGHT_PREPARING * 100.0) as i64);
            update.progress = Some(progress);
        }
        PostEffect::ResetProgress => {
            update.progress = Some(Default::default());
            update.install_started_at = Some(None);
            update.install_completed_at = Some(None);
            update.controller_logs_started_at = Some(None);
            update.controller_logs_collected_at = Some(None);
            update.logs_info = Some(None);
        }
        PostEffect::Complete => {
            let mut progress = cluster.progress;
            progress.finalizing_stage_percentage = 100;
            progress.total_percentage = 100;
            update.progress = Some(progress);
            update.install_completed_at = Some(Some(ctx.now));
        }
    }
    update
}
