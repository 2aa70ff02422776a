//! Projection of a backend host onto `AgentStatus`.

use super::conditions::{host_conditions, spec_synced, SyncResult};
use assisted_client::{Host, HostRole, HostStatus, Inventory};
use chrono::{DateTime, Utc};
use crds::{
    set_condition, AgentRole, AgentStatus, DebugInfo, HostCpu, HostDisk, HostInterface, HostInventory, HostMemory,
    HostNtpSource, HostProgressInfo, HostSystemVendor, ValidationInfo,
};
use std::collections::BTreeMap;

pub fn events_url(base_url: &str, host: &Host) -> String {
    format!("{}/api/assisted-install/v2/events?host_id={}", base_url, host.id)
}

/// Logs URL once collection started or the host reached a terminal state
pub fn logs_url(base_url: &str, host: &Host) -> Option<String> {
    let cluster_id = host.cluster_id?;
    let collected = host.logs_collected_at.is_some() || host.logs_info.is_some();
    let terminal = matches!(
        host.status,
        HostStatus::Installed | HostStatus::Error | HostStatus::AddedToExistingCluster
    );
    (collected || terminal).then(|| format!("{}/api/assisted-install/v2/clusters/{}/logs", base_url, cluster_id))
}

fn agent_role(role: HostRole) -> AgentRole {
    match role {
        HostRole::AutoAssign => AgentRole::AutoAssign,
        HostRole::Master => AgentRole::Master,
        HostRole::Worker => AgentRole::Worker,
        HostRole::Bootstrap => AgentRole::Bootstrap,
    }
}

fn inventory(inv: &Inventory) -> HostInventory {
    HostInventory {
        hostname: inv.hostname.clone(),
        bmc_address: inv.bmc_address.clone(),
        system_vendor: HostSystemVendor {
            manufacturer: inv.system_vendor.manufacturer.clone(),
            product_name: inv.system_vendor.product_name.clone(),
            serial_number: inv.system_vendor.serial_number.clone(),
            is_virtual: inv.system_vendor.is_virtual,
        },
        cpu: HostCpu {
            architecture: inv.cpu.architecture.clone(),
            count: inv.cpu.count,
            clock_megahertz: inv.cpu.frequency,
            model_name: inv.cpu.model_name.clone(),
            flags: inv.cpu.flags.clone(),
        },
        memory: HostMemory {
            physical_bytes: inv.memory.physical_bytes,
            usable_bytes: inv.memory.usable_bytes,
        },
        interfaces: inv
            .interfaces
            .iter()
            .map(|i| HostInterface {
                name: i.name.clone(),
                mac_address: i.mac_address.clone(),
                ipv4_addresses: i.ipv4_addresses.clone(),
                ipv6_addresses: i.ipv6_addresses.clone(),
                speed_mbps: i.speed_mbps,
                flags: i.flags.clone(),
            })
            .collect(),
        disks: inv
            .disks
            .iter()
            .map(|d| HostDisk {
                id: d.id.clone(),
                name: d.name.clone(),
                path: d.path.clone(),
                drive_type: d.drive_type.clone(),
                size_bytes: d.size_bytes,
                bootable: d.bootable,
            })
            .collect(),
        boot_mode: inv.boot.current_boot_mode.clone(),
    }
}

fn validations(host: &Host) -> BTreeMap<String, Vec<ValidationInfo>> {
    host.validations_info
        .0
        .iter()
        .filter(|(_, results)| !results.is_empty())
        .map(|(category, results)| {
            let infos = results
                .iter()
                .map(|r| ValidationInfo {
                    id: r.id.clone(),
                    status: r.status.as_str().to_string(),
                    message: r.message.clone(),
                })
                .collect();
            (category.clone(), infos)
        })
        .collect()
}

fn progress(host: &Host) -> Option<HostProgressInfo> {
    host.progress.as_ref().map(|p| HostProgressInfo {
        current_stage: p.current_stage.map(|s| s.as_str().to_string()).unwrap_or_default(),
        progress_info: p.progress_info.clone(),
        stage_start_time: p.stage_started_at,
        stage_update_time: p.stage_updated_at,
    })
}

/// Full status for an Agent whose backend host is known.
///
/// Conditions are upserted onto `previous` so unchanged conditions keep their
/// transition times.
pub fn project(
    previous: Option<&AgentStatus>,
    host: &Host,
    approved: bool,
    sync: &SyncResult,
    base_url: &str,
    now: DateTime<Utc>,
) -> AgentStatus {
    let mut conditions = previous.map(|s| s.conditions.clone()).unwrap_or_default();
    set_condition(&mut conditions, spec_synced(sync), now);
    for condition in host_conditions(host, approved) {
        set_condition(&mut conditions, condition, now);
    }

    AgentStatus {
        conditions,
        inventory: host.inventory.as_ref().map(inventory),
        validations_info: validations(host),
        progress: progress(host),
        role: Some(agent_role(host.effective_role())),
        bootstrap: host.bootstrap,
        debug_info: DebugInfo {
            state: host.status.as_str().to_string(),
            state_info: host.status_info.clone(),
            logs_url: logs_url(base_url, host).unwrap_or_default(),
            events_url: events_url(base_url, host),
        },
        ntp_sources: host
            .ntp_sources
            .iter()
            .map(|s| HostNtpSource {
                source_name: s.source_name.clone(),
                source_state: s.source_state.clone(),
            })
            .collect(),
        installation_disk_id: (!host.installation_disk_id.is_empty()).then(|| host.installation_disk_id.clone()),
    }
}

/// Previous status with only SpecSynced updated, for when the host could not be read
pub fn with_sync_result(previous: Option<&AgentStatus>, sync: &SyncResult, now: DateTime<Utc>) -> AgentStatus {
    let mut status = previous.cloned().unwrap_or_default();
    set_condition(&mut status.conditions, spec_synced(sync), now);
    status
}
