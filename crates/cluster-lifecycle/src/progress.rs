//! Installation progress
//!
//! Pure computations; the manager persists the results.

use assisted_client::{Cluster, ClusterProgress, ClusterStatus, Host, HostRole, HostStage, OperatorStatus, OperatorType};

pub const WEIGHT_PREPARING: f64 = 0.1;
pub const WEIGHT_INSTALLING: f64 = 0.7;
pub const WEIGHT_FINALIZING: f64 = 0.2;

const BOOTSTRAP_STAGES: &[HostStage] = &[
    HostStage::StartingInstallation,
    HostStage::WaitingForControlPlane,
    HostStage::Installing,
    HostStage::WritingImageToDisk,
    HostStage::WaitingForController,
    HostStage::Rebooting,
    HostStage::Configuring,
    HostStage::Joined,
    HostStage::Done,
];

const MASTER_STAGES: &[HostStage] = &[
    HostStage::StartingInstallation,
    HostStage::Installing,
    HostStage::WritingImageToDisk,
    HostStage::Rebooting,
    HostStage::Configuring,
    HostStage::Joined,
    HostStage::Done,
];

const WORKER_STAGES: &[HostStage] = &[
    HostStage::StartingInstallation,
    HostStage::Installing,
    HostStage::WritingImageToDisk,
    HostStage::Rebooting,
    HostStage::WaitingForIgnition,
    HostStage::Configuring,
    HostStage::Joined,
    HostStage::Done,
];

const SINGLE_NODE_STAGES: &[HostStage] = &[
    HostStage::StartingInstallation,
    HostStage::Installing,
    HostStage::WaitingForBootkube,
    HostStage::WritingImageToDisk,
    HostStage::Rebooting,
    HostStage::Done,
];

/// Ordered stage list a host walks through
pub fn stages_for(role: HostRole, bootstrap: bool, single_node: bool) -> &'static [HostStage] {
    if single_node {
        return SINGLE_NODE_STAGES;
    }
    if bootstrap {
        return BOOTSTRAP_STAGES;
    }
    match role {
        HostRole::Worker => WORKER_STAGES,
        HostRole::Master | HostRole::Bootstrap | HostRole::AutoAssign => MASTER_STAGES,
    }
}

/// Stages completed by a host, counting the current one as done
fn done_stages(host: &Host, stages: &[HostStage]) -> usize {
    host.current_stage()
        .and_then(|current| stages.iter().position(|s| *s == current))
        .map_or(0, |index| index + 1)
}

/// Percentage of host stages done across the cluster
pub fn installing_stage_percentage(cluster: &Cluster) -> i64 {
    let single_node = cluster.is_single_node();
    let (done, total) = cluster.hosts.iter().fold((0usize, 0usize), |(done, total), host| {
        let stages = stages_for(host.effective_role(), host.bootstrap, single_node);
        (done + done_stages(host, stages), total + stages.len())
    });
    if total == 0 {
        return 0;
    }
    ((done as f64 / total as f64) * 100.0) as i64
}

/// Progress after a host stage update. `None` for day-2 clusters, which
/// have no progress of their own.
pub fn install_progress(cluster: &Cluster) -> Option<ClusterProgress> {
    if cluster.is_day2() {
        return None;
    }
    let mut progress = cluster.progress;
    if cluster.status == ClusterStatus::Installed {
        progress.installing_stage_percentage = 100;
        progress.total_percentage = 100;
        return Some(progress);
    }
    progress.installing_stage_percentage = installing_stage_percentage(cluster);
    progress.total_percentage = (WEIGHT_INSTALLING * progress.installing_stage_percentage as f64) as i64
        + (WEIGHT_PREPARING * progress.preparing_stage_percentage as f64) as i64;
    Some(progress)
}

/// Percentage of monitored operators in a terminal state. Builtin operators
/// count only once available; OLM operators also count when failed.
pub fn finalizing_stage_percentage(cluster: &Cluster) -> i64 {
    if cluster.monitored_operators.is_empty() {
        return 100;
    }
    let done = cluster
        .monitored_operators
        .iter()
        .filter(|o| match (o.operator_type, o.status) {
            (OperatorType::Builtin, Some(OperatorStatus::Available)) => true,
            (OperatorType::Olm, Some(OperatorStatus::Available | OperatorStatus::Failed)) => true,
            _ => false,
        })
        .count();
    ((done as f64 / cluster.monitored_operators.len() as f64) * 100.0) as i64
}

/// Progress after an operator status update, or `None` when it would move
/// the stored total backwards.
pub fn finalizing_progress(cluster: &Cluster) -> Option<ClusterProgress> {
    let mut progress = cluster.progress;
    progress.finalizing_stage_percentage = finalizing_stage_percentage(cluster);
    let total = (WEIGHT_FINALIZING * progress.finalizing_stage_percentage as f64) as i64
        + (WEIGHT_PREPARING * progress.preparing_stage_percentage as f64
            + WEIGHT_INSTALLING * progress.installing_stage_percentage as f64) as i64;
    if total < cluster.progress.total_percentage {
        return None;
    }
    progress.total_percentage = total;
    Some(progress)
}

/// Progress once installation completes
pub fn completed() -> ClusterProgress {
    ClusterProgress {
        preparing_stage_percentage: 100,
        installing_stage_percentage: 100,
        finalizing_stage_percentage: 100,
        total_percentage: 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use assisted_client::{HighAvailabilityMode, MonitoredOperator};

    fn operator(name: &str, operator_type: OperatorType, status: Option<OperatorStatus>) -> MonitoredOperator {
        MonitoredOperator {
            name: name.to_string(),
            operator_type,
            status,
            status_info: String::new(),
        }
    }

    #[test]
    fn test_stage_lists() {
        assert_eq!(stages_for(HostRole::Master, true, false).len(), 9);
        assert_eq!(stages_for(HostRole::Worker, false, false).len(), 8);
        assert_eq!(stages_for(HostRole::Worker, false, true), SINGLE_NODE_STAGES);
        assert_eq!(*stages_for(HostRole::Master, false, false).last().unwrap(), HostStage::Done);
    }

    #[test]
    fn test_installing_percentage() {
        let mut cluster = ready_cluster();
        cluster.status = ClusterStatus::Installing;
        // 3 masters, 7 stages each; one host done, others not started
        set_stage(&mut cluster.hosts[0], HostStage::Done);
        assert_eq!(installing_stage_percentage(&cluster), 33);

        let progress = install_progress(&cluster).unwrap();
        assert_eq!(progress.installing_stage_percentage, 33);
        assert_eq!(progress.total_percentage, 23);
    }

    #[test]
    fn test_preparing_weight_included() {
        let mut cluster = ready_cluster();
        cluster.status = ClusterStatus::Installing;
        cluster.progress.preparing_stage_percentage = 100;
        for host in &mut cluster.hosts {
            set_stage(host, HostStage::Done);
        }
        let progress = install_progress(&cluster).unwrap();
        assert_eq!(progress.installing_stage_percentage, 100);
        assert_eq!(progress.total_percentage, 80);
    }

    #[test]
    fn test_installed_forces_full_progress() {
        let mut cluster = ready_cluster();
        cluster.status = ClusterStatus::Installed;
        let progress = install_progress(&cluster).unwrap();
        assert_eq!(progress.installing_stage_percentage, 100);
        assert_eq!(progress.total_percentage, 100);
    }

    #[test]
    fn test_day2_has_no_progress() {
        let mut cluster = ready_cluster();
        cluster.kind = assisted_client::ClusterKind::AddHostsCluster;
        assert!(install_progress(&cluster).is_none());
    }

    #[test]
    fn test_single_node_stages() {
        let mut cluster = ready_cluster();
        cluster.high_availability_mode = HighAvailabilityMode::None;
        cluster.hosts.truncate(1);
        set_stage(&mut cluster.hosts[0], HostStage::Rebooting);
        assert_eq!(installing_stage_percentage(&cluster), 83);
    }

    #[test]
    fn test_finalizing_counts_failed_olm_only() {
        let mut cluster = ready_cluster();
        cluster.monitored_operators = vec![
            operator("console", OperatorType::Builtin, Some(OperatorStatus::Failed)),
            operator("cvo", OperatorType::Builtin, Some(OperatorStatus::Available)),
            operator("lso", OperatorType::Olm, Some(OperatorStatus::Failed)),
            operator("odf", OperatorType::Olm, Some(OperatorStatus::Progressing)),
        ];
        assert_eq!(finalizing_stage_percentage(&cluster), 50);
    }

    #[test]
    fn test_finalizing_never_moves_backwards() {
        let mut cluster = ready_cluster();
        cluster.progress = ClusterProgress {
            preparing_stage_percentage: 100,
            installing_stage_percentage: 100,
            finalizing_stage_percentage: 0,
            total_percentage: 0,
        };
        cluster.monitored_operators = vec![
            operator("console", OperatorType::Builtin, Some(OperatorStatus::Available)),
            operator("cvo", OperatorType::Builtin, Some(OperatorStatus::Available)),
        ];
        let first = finalizing_progress(&cluster).unwrap();
        assert_eq!(first.total_percentage, 100);
        cluster.progress = first;

        // An operator regresses; the stored total must stay
        cluster.monitored_operators[1].status = Some(OperatorStatus::Progressing);
        assert!(finalizing_progress(&cluster).is_none());
    }
}
