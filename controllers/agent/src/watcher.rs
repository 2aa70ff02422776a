//! Kubernetes resource watchers.
//!
//! Agents are reconciled through `kube_runtime::Controller`. Changes to a
//! ClusterDeployment are mapped to the Agents that reference it, so a cluster
//! becoming installed or getting its admin kubeconfig reaches its hosts
//! without waiting for a resync.

use crate::error::ControllerError;
use crate::reconciler::{ReconcileOutcome, Reconciler, ReconcilerSettings};
use crds::{Agent, ClusterDeployment};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Delay used for "requeue now" so the debounce can coalesce bursts
const REQUEUE_NOW_DELAY: Duration = Duration::from_secs(1);
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Translate a reconcile outcome into a controller action
pub fn outcome_action(outcome: ReconcileOutcome, settings: &ReconcilerSettings) -> Action {
    match outcome {
        ReconcileOutcome::Done => Action::requeue(settings.resync_interval),
        ReconcileOutcome::RequeueNow => Action::requeue(REQUEUE_NOW_DELAY),
        ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
    }
}

/// True when `agent` points at `cluster_deployment`
pub fn references(agent: &Agent, cluster_deployment: &ClusterDeployment) -> bool {
    let Some(reference) = agent.spec.cluster_deployment_name.as_ref() else {
        return false;
    };
    Some(reference.name.as_str()) == cluster_deployment.metadata.name.as_deref()
        && Some(reference.namespace.as_str()) == cluster_deployment.metadata.namespace.as_deref()
}

async fn reconcile(agent: Arc<Agent>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let name = agent.name_any();
    let namespace = agent
        .namespace()
        .ok_or_else(|| ControllerError::Reconciliation(format!("Agent {} has no namespace", name)))?;
    debug!("Reconcile triggered for Agent {}/{}", namespace, name);
    let outcome = reconciler.reconcile_agent(&namespace, &name).await?;
    Ok(outcome_action(outcome, reconciler.settings()))
}

fn error_policy(agent: Arc<Agent>, error: &ControllerError, _ctx: Arc<Reconciler>) -> Action {
    error!(
        "Reconciliation error for Agent {}/{}: {}",
        agent.namespace().unwrap_or_default(),
        agent.name_any(),
        error
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Watches Agents and the ClusterDeployments they reference.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    agent_api: Api<Agent>,
    cluster_deployment_api: Api<ClusterDeployment>,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        agent_api: Api<Agent>,
        cluster_deployment_api: Api<ClusterDeployment>,
    ) -> Self {
        Self {
            reconciler,
            agent_api,
            cluster_deployment_api,
        }
    }

    /// Run the Agent controller until its watch stream ends
    pub async fn watch_agents(&self) -> Result<(), ControllerError> {
        info!("Starting Agent watcher");

        let controller = Controller::new(self.agent_api.clone(), watcher::Config::default());
        let agents = controller.store();
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(5))
            .concurrency(3);

        controller
            .watches(
                self.cluster_deployment_api.clone(),
                watcher::Config::default(),
                move |cluster_deployment: ClusterDeployment| {
                    agents
                        .state()
                        .into_iter()
                        .filter(|agent| references(agent, &cluster_deployment))
                        .map(|agent| ObjectRef::from_obj(agent.as_ref()))
                        .collect::<Vec<_>>()
                },
            )
            .with_config(controller_config)
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                if let Err(e) = res {
                    error!("Controller error for Agent: {}", e);
                }
            })
            .await;

        Ok(())
    }
}
