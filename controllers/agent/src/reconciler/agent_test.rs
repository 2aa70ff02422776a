//! Reconcile scenarios for Agents against the mock backend.

#[cfg(test)]
mod tests {
    use crate::reconciler::conditions::*;
    use crate::reconciler::ReconcileOutcome;
    use crate::test_utils::*;
    use assisted_client::{HostRole, HostStatus, InstallerArgs, MockCall, MockOp};
    use crds::{AgentRole, ConditionStatus, ConditionType, SecretReference, AGENT_FINALIZER};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::time::Duration;
    use uuid::Uuid;

    /// Context with a cluster, a host in `status` bound to it and a matching Agent
    fn setup(status: HostStatus) -> TestContext {
        let ctx = create_test_context();
        let cluster = create_test_cluster();
        ctx.installer.add_cluster(cluster_key(), cluster.clone());
        ctx.installer.add_host(agent_key(), create_test_host(status, Some(cluster.id)));
        ctx.kube.add_agent(create_test_agent());
        ctx
    }

    #[tokio::test]
    async fn test_missing_agent_is_noop() {
        let ctx = create_test_context();
        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert!(ctx.installer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_finalizer_added_first() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| a.metadata.finalizers = None);

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::RequeueNow);
        assert_eq!(
            ctx.agent().metadata.finalizers,
            Some(vec![AGENT_FINALIZER.to_string()])
        );
        assert!(ctx.installer.calls().is_empty());
        assert!(ctx.agent().status.is_none());
    }

    #[tokio::test]
    async fn test_second_reconcile_makes_no_writes() {
        let ctx = setup(HostStatus::Known);

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.installer.write_count(), 0);
        assert_eq!(ctx.kube.status_patch_count(), 1);
        assert_eq!(ctx.kube.metadata_patch_count(), 1);
        let first = ctx.agent().status;

        ctx.installer.clear_calls();
        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.installer.write_count(), 0);
        assert_eq!(ctx.kube.status_patch_count(), 1);
        assert_eq!(ctx.kube.metadata_patch_count(), 1);
        assert_eq!(ctx.agent().status, first);
    }

    #[tokio::test]
    async fn test_approval_flows_to_requirements_met() {
        let ctx = setup(HostStatus::Known);

        ctx.reconcile().await;
        let met = ctx.condition(ConditionType::RequirementsMet);
        assert_eq!(met.status, ConditionStatus::False);
        assert_eq!(met.reason, AGENT_NOT_APPROVED_REASON);

        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| a.spec.approved = true);
        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UpdateApproved), 1);
        assert!(ctx.host().approved);
        let met = ctx.condition(ConditionType::RequirementsMet);
        assert_eq!(met.status, ConditionStatus::True);
        assert_eq!(met.reason, AGENT_READY_REASON);

        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UpdateApproved), 1);
    }

    #[tokio::test]
    async fn test_installer_args_written_once() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.installer_args = r#"["--append-karg", "ip=192.0.2.2::192.0.2.254:255.255.255.0:core0.example.com:enp1s0:none", "--save-partindex", "1", "-n"]"#.to_string();
        });

        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UpdateInstallerArgs), 1);
        assert_eq!(ctx.host().installer_args.0.len(), 5);

        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.installer_args = r#"["-n","--save-partindex","1","--append-karg","ip=192.0.2.2::192.0.2.254:255.255.255.0:core0.example.com:enp1s0:none"]"#.to_string();
        });
        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UpdateInstallerArgs), 1);
    }

    #[tokio::test]
    async fn test_clearing_installer_args() {
        let ctx = setup(HostStatus::Known);
        ctx.installer
            .modify_host(&agent_key(), |h| h.installer_args = InstallerArgs(vec!["-n".to_string()]));

        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UpdateInstallerArgs), 1);
        assert!(ctx.host().installer_args.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_installer_args_is_input_error() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.installer_args =
                r#""--append-karg", "ip=192.0.2.2::192.0.2.254:255.255.255.0:core0.example.com:enp1s0:none", "-n"]"#
                    .to_string();
            a.spec.approved = true;
            a.spec.hostname = "renamed".to_string();
        });

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.installer.write_count(), 0);
        let synced = ctx.condition(ConditionType::SpecSynced);
        assert_eq!(synced.status, ConditionStatus::False);
        assert_eq!(synced.reason, INPUT_ERROR_REASON);
        assert!(synced.message.starts_with(INPUT_ERROR_MSG));
    }

    #[tokio::test]
    async fn test_malformed_ignition_overrides_is_input_error() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.ignition_config_overrides = r#"{"ignition": {"version": "3.1.0"}"#.to_string();
        });

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.installer.write_count(), 0);
        assert_eq!(ctx.condition(ConditionType::SpecSynced).reason, INPUT_ERROR_REASON);
    }

    #[tokio::test]
    async fn test_ignition_overrides_written_once() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.ignition_config_overrides =
                r#"{"ignition": {"version": "3.1.0"}, "storage": {"files": []}}"#.to_string();
        });

        ctx.reconcile().await;
        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UpdateIgnition), 1);
    }

    #[tokio::test]
    async fn test_host_fields_in_single_update() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.hostname = "worker-0".to_string();
            a.spec.role = Some(AgentRole::Worker);
            a.spec.installation_disk_id = "/dev/disk/by-id/wwn-0x1111".to_string();
        });

        ctx.reconcile().await;
        let updates: Vec<MockCall> = ctx
            .installer
            .calls()
            .into_iter()
            .filter(|c| c.op() == MockOp::UpdateHost)
            .collect();
        assert_eq!(updates.len(), 1);
        let MockCall::UpdateHost { params, .. } = &updates[0] else {
            panic!("expected an UpdateHost call");
        };
        assert_eq!(params.host_name.as_deref(), Some("worker-0"));
        assert_eq!(params.host_role, Some(HostRole::Worker));
        assert_eq!(params.disks_selected_config.len(), 1);
        assert!(params.ignition_endpoint_token.is_none());

        let host = ctx.host();
        assert_eq!(host.hostname(), "worker-0");
        assert_eq!(host.role, HostRole::Worker);

        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UpdateHost), 1);
    }

    #[tokio::test]
    async fn test_locked_host_fields_not_synced() {
        let ctx = setup(HostStatus::Installing);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.hostname = "worker-0".to_string();
            a.spec.installer_args = r#"["-n"]"#.to_string();
        });

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.installer.count(MockOp::UpdateHost), 0);
        assert_eq!(ctx.installer.count(MockOp::UpdateInstallerArgs), 0);
        assert_eq!(
            ctx.condition(ConditionType::RequirementsMet).reason,
            AGENT_ALREADY_INSTALLING_REASON
        );

        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.installer_args = r#""--append-karg", "x"]"#.to_string();
            a.spec.ignition_config_overrides = r#"{"ignition": "#.to_string();
        });
        ctx.installer.clear_calls();
        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.installer.write_count(), 0);
        let synced = ctx.condition(ConditionType::SpecSynced);
        assert_eq!(synced.status, ConditionStatus::True);
        assert_eq!(synced.reason, SYNC_OK_REASON);
    }

    #[tokio::test]
    async fn test_locked_host_with_malformed_args_still_syncs_approval() {
        let ctx = setup(HostStatus::Installed);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.installer_args = "not json".to_string();
            a.spec.approved = true;
        });

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.installer.count(MockOp::UpdateApproved), 1);
        assert!(ctx.host().approved);
        assert_eq!(ctx.condition(ConditionType::SpecSynced).reason, SYNC_OK_REASON);
    }

    #[tokio::test]
    async fn test_known_unbound_approved_agent_is_ready() {
        let ctx = create_test_context();
        ctx.installer.add_host(agent_key(), create_test_host(HostStatus::KnownUnbound, None));
        let mut agent = create_test_agent();
        agent.spec.cluster_deployment_name = None;
        agent.spec.approved = true;
        ctx.kube.add_agent(agent);

        ctx.reconcile().await;
        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UpdateApproved), 1);
        let met = ctx.condition(ConditionType::RequirementsMet);
        assert_eq!(met.status, ConditionStatus::True);
        assert_eq!(met.reason, AGENT_READY_REASON);
        let bound = ctx.condition(ConditionType::Bound);
        assert_eq!(bound.status, ConditionStatus::False);
        assert_eq!(bound.reason, UNBOUND_REASON);
    }

    #[tokio::test]
    async fn test_ignition_token_from_secret() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.add_secret(create_test_secret("token-secret", "ignition-token", "s3cr3t"));
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.ignition_endpoint_token_reference = Some(SecretReference {
                name: "token-secret".to_string(),
                namespace: None,
            });
        });

        ctx.reconcile().await;
        assert_eq!(ctx.host().ignition_endpoint_token, "s3cr3t");

        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UpdateHost), 1);
    }

    #[tokio::test]
    async fn test_missing_token_secret_is_not_fatal() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.spec.ignition_endpoint_token_reference = Some(SecretReference {
                name: "missing".to_string(),
                namespace: None,
            });
        });

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.installer.count(MockOp::UpdateHost), 0);
        assert_eq!(ctx.condition(ConditionType::SpecSynced).reason, SYNC_OK_REASON);
    }

    #[tokio::test]
    async fn test_rebind_unbinds_then_binds() {
        let ctx = setup(HostStatus::Known);
        let other_cluster = Uuid::new_v4();
        ctx.installer.modify_host(&agent_key(), |h| h.cluster_id = Some(other_cluster));

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::RequeueNow);
        assert_eq!(ctx.installer.count(MockOp::UnbindHost), 1);
        assert_eq!(ctx.installer.count(MockOp::BindHost), 0);
        assert_eq!(ctx.host().cluster_id, None);
        assert_eq!(ctx.condition(ConditionType::Bound).reason, UNBINDING_REASON);

        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::UnbindHost), 1);
        assert_eq!(ctx.installer.count(MockOp::BindHost), 1);
        assert!(ctx.host().cluster_id.is_some_and(|id| id != other_cluster));
        assert_eq!(ctx.condition(ConditionType::Bound).reason, BINDING_REASON);
    }

    #[tokio::test]
    async fn test_unbound_host_is_bound() {
        let ctx = setup(HostStatus::KnownUnbound);
        ctx.installer.modify_host(&agent_key(), |h| h.cluster_id = None);

        ctx.reconcile().await;
        assert_eq!(ctx.installer.count(MockOp::BindHost), 1);
        assert_eq!(ctx.host().status, HostStatus::Binding);
    }

    #[tokio::test]
    async fn test_removed_reference_unbinds() {
        let ctx = setup(HostStatus::Known);
        ctx.kube
            .modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| a.spec.cluster_deployment_name = None);

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::RequeueNow);
        assert_eq!(ctx.installer.count(MockOp::UnbindHost), 1);
        assert_eq!(ctx.installer.count(MockOp::GetCluster), 0);
    }

    #[tokio::test]
    async fn test_unbind_failure_is_tolerated() {
        let ctx = setup(HostStatus::Known);
        ctx.installer.modify_host(&agent_key(), |h| h.cluster_id = Some(Uuid::new_v4()));
        ctx.installer.fail(MockOp::UnbindHost, "backend unavailable");

        let outcome = ctx.reconcile().await;
        assert_eq!(outcome, ReconcileOutcome::RequeueAfter(Duration::from_secs(60)));
        assert_eq!(ctx.installer.count(MockOp::BindHost), 0);
        assert_eq!(ctx.condition(ConditionType::SpecSynced).reason, SYNC_OK_REASON);
    }

    #[tokio::test]
    async fn test_bind_failure_is_backend_error() {
        let ctx = setup(HostStatus::KnownUnbound);
        ctx.installer.modify_host(&agent_key(), |h| h.cluster_id = None);
        ctx.installer.fail(MockOp::BindHost, "backend unavailable");

        let outcome = ctx.reconcile().await;
        assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(_)));
        let synced = ctx.condition(ConditionType::SpecSynced);
        assert_eq!(synced.reason, BACKEND_ERROR_REASON);
        assert!(synced.message.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_backend_errors_back_off() {
        let ctx = setup(HostStatus::Known);
        ctx.installer.fail(MockOp::GetHost, "connection refused");

        let secs = |s| ReconcileOutcome::RequeueAfter(Duration::from_secs(s));
        assert_eq!(ctx.reconcile().await, secs(60));
        assert_eq!(ctx.reconcile().await, secs(60));
        assert_eq!(ctx.reconcile().await, secs(120));
        let synced = ctx.condition(ConditionType::SpecSynced);
        assert_eq!(synced.status, ConditionStatus::False);
        assert_eq!(
            synced.message,
            format!("{} failed to get host: backend API error: connection refused", BACKEND_ERROR_MSG)
        );

        ctx.installer.clear_failure(MockOp::GetHost);
        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.condition(ConditionType::SpecSynced).reason, SYNC_OK_REASON);

        ctx.installer.fail(MockOp::GetHost, "connection refused");
        assert_eq!(ctx.reconcile().await, secs(60));
    }

    #[tokio::test]
    async fn test_unresolvable_cluster_is_backend_error() {
        let ctx = setup(HostStatus::Known);
        ctx.installer.remove_cluster(&cluster_key());

        assert!(matches!(ctx.reconcile().await, ReconcileOutcome::RequeueAfter(_)));
        assert_eq!(ctx.installer.count(MockOp::GetHost), 0);
        assert_eq!(ctx.installer.write_count(), 0);
        assert_eq!(ctx.condition(ConditionType::SpecSynced).reason, BACKEND_ERROR_REASON);
    }

    #[tokio::test]
    async fn test_approval_failure_is_backend_error() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| a.spec.approved = true);
        ctx.installer.fail(MockOp::UpdateApproved, "conflict");

        assert!(matches!(ctx.reconcile().await, ReconcileOutcome::RequeueAfter(_)));
        assert!(!ctx.host().approved);
        assert_eq!(ctx.condition(ConditionType::SpecSynced).reason, BACKEND_ERROR_REASON);
        assert_eq!(
            ctx.condition(ConditionType::RequirementsMet).reason,
            AGENT_NOT_APPROVED_REASON
        );
    }

    #[tokio::test]
    async fn test_host_gone_deletes_agent() {
        let ctx = create_test_context();
        let cluster = create_test_cluster();
        ctx.installer.add_cluster(cluster_key(), cluster);
        ctx.kube.add_agent(create_test_agent());

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.kube.delete_count(), 1);
        assert!(ctx.agent().metadata.deletion_timestamp.is_some());

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert!(ctx.kube.agent(TEST_NAMESPACE, TEST_AGENT).is_none());
        assert_eq!(ctx.installer.count(MockOp::DeregisterHost), 0);
    }

    #[tokio::test]
    async fn test_deleted_agent_deregisters_host() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        });

        assert_eq!(ctx.reconcile().await, ReconcileOutcome::Done);
        assert_eq!(ctx.installer.count(MockOp::DeregisterHost), 1);
        assert!(ctx.installer.host(&agent_key()).is_none());
        assert!(ctx.kube.agent(TEST_NAMESPACE, TEST_AGENT).is_none());
    }

    #[tokio::test]
    async fn test_deregister_failure_keeps_finalizer() {
        let ctx = setup(HostStatus::Known);
        ctx.kube.modify_agent(TEST_NAMESPACE, TEST_AGENT, |a| {
            a.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        });
        ctx.installer.fail(MockOp::DeregisterHost, "backend unavailable");

        assert!(matches!(ctx.reconcile().await, ReconcileOutcome::RequeueAfter(_)));
        assert_eq!(
            ctx.agent().metadata.finalizers,
            Some(vec![AGENT_FINALIZER.to_string()])
        );
    }

    #[tokio::test]
    async fn test_status_projection() {
        let ctx = setup(HostStatus::Installed);
        ctx.installer.modify_host(&agent_key(), |h| {
            h.status_info = "Done".to_string();
            h.role = HostRole::Worker;
        });

        ctx.reconcile().await;
        let agent = ctx.agent();
        let status = agent.status.clone().unwrap();
        let host = ctx.host();
        assert_eq!(status.role, Some(AgentRole::Worker));
        assert_eq!(status.debug_info.state, "installed");
        assert_eq!(status.debug_info.state_info, "Done");
        assert_eq!(
            status.debug_info.events_url,
            format!("{}/api/assisted-install/v2/events?host_id={}", BASE_URL, host.id)
        );
        assert_eq!(
            status.debug_info.logs_url,
            format!(
                "{}/api/assisted-install/v2/clusters/{}/logs",
                BASE_URL,
                host.cluster_id.unwrap()
            )
        );
        assert_eq!(status.inventory.as_ref().map(|i| i.hostname.as_str()), Some(TEST_HOSTNAME));
        assert_eq!(status.conditions.len(), ConditionType::ALL.len());

        let installed = ctx.condition(ConditionType::Installed);
        assert_eq!(installed.status, ConditionStatus::True);
        assert_eq!(installed.message, format!("{} Done", INSTALLED_MSG));

        let labels = agent.metadata.labels.unwrap();
        assert_eq!(
            labels.get("inventory.agent-install.openshift.io/cpu-architecture").map(String::as_str),
            Some("x86_64")
        );
        assert_eq!(
            labels.get("inventory.agent-install.openshift.io/host-manufacturer").map(String::as_str),
            Some("RedHat")
        );
        let annotations = agent.metadata.annotations.unwrap();
        assert_eq!(
            annotations.get("inventory.agent-install.openshift.io/version").map(String::as_str),
            Some("0.1")
        );
    }

    #[tokio::test]
    async fn test_disconnected_host_conditions() {
        let ctx = setup(HostStatus::Disconnected);

        ctx.reconcile().await;
        let connected = ctx.condition(ConditionType::Connected);
        assert_eq!(connected.status, ConditionStatus::False);
        assert_eq!(connected.reason, AGENT_DISCONNECTED_REASON);
        assert_eq!(ctx.condition(ConditionType::Bound).reason, BOUND_REASON);
    }
}
