//! Leader election over a `coordination.k8s.io/v1` Lease.
//!
//! Only the lease holder runs monitoring sweeps. Every replica keeps trying
//! to acquire or renew the lease; writes carry the observed resourceVersion,
//! so a concurrent change fails with 409 and the attempt counts as lost.

use chrono::{DateTime, Utc};
use cluster_lifecycle::LeaderGate;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What to do with the lease as observed at `now`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    Create,
    Renew,
    /// Expired lease of another holder; carries the next transition count
    TakeOver(i32),
    /// Held by someone else and still valid
    Wait,
}

/// Decide how `identity` should act on `existing`
pub fn lease_action(existing: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseAction {
    let Some(lease) = existing else {
        return LeaseAction::Create;
    };
    let spec = lease.spec.as_ref();
    if spec.and_then(|s| s.holder_identity.as_deref()) == Some(identity) {
        return LeaseAction::Renew;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (renew_time, duration) {
        (Some(renewed), Some(seconds)) => now > renewed.0 + chrono::Duration::seconds(i64::from(seconds)),
        _ => true,
    };
    if expired {
        LeaseAction::TakeOver(spec.and_then(|s| s.lease_transitions).unwrap_or(0) + 1)
    } else {
        LeaseAction::Wait
    }
}

fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 409)
}

/// Lease-based `LeaderGate`
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    is_leader: AtomicBool,
}

impl LeaderElector {
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            is_leader: AtomicBool::new(false),
        }
    }

    /// Acquire and renew the lease forever, tracking leadership in `is_leader`
    pub async fn run(self: Arc<Self>) {
        info!("Starting leader election for {} as {}", self.lease_name, self.identity);
        loop {
            let leading = match self.try_acquire_or_renew().await {
                Ok(leading) => leading,
                Err(e) => {
                    warn!("Lease {} update failed: {}", self.lease_name, e);
                    false
                }
            };
            let was_leading = self.is_leader.swap(leading, Ordering::SeqCst);
            match (was_leading, leading) {
                (false, true) => info!("Acquired leadership of {}", self.lease_name),
                (true, false) => warn!("Lost leadership of {}", self.lease_name),
                _ => {}
            }
            tokio::time::sleep(if leading { RENEW_INTERVAL } else { RETRY_INTERVAL }).await;
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();
        let existing = api.get_opt(&self.lease_name).await?;

        let resource_version = existing.as_ref().and_then(|l| l.metadata.resource_version.clone());
        let lease = match lease_action(existing.as_ref(), &self.identity, now) {
            LeaseAction::Wait => return Ok(false),
            LeaseAction::Create => {
                let lease = self.lease(now, now, 0, None);
                return match api.create(&PostParams::default(), &lease).await {
                    Ok(_) => {
                        info!("Created lease {}", self.lease_name);
                        Ok(true)
                    }
                    Err(e) if is_conflict(&e) => Ok(false),
                    Err(e) => Err(e),
                };
            }
            LeaseAction::Renew => {
                let spec = existing.as_ref().and_then(|l| l.spec.as_ref());
                let acquired = spec.and_then(|s| s.acquire_time.as_ref()).map_or(now, |t| t.0);
                let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);
                self.lease(acquired, now, transitions, resource_version)
            }
            LeaseAction::TakeOver(transitions) => {
                debug!("Taking over expired lease {}", self.lease_name);
                self.lease(now, now, transitions, resource_version)
            }
        };

        match api.replace(&self.lease_name, &PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn lease(
        &self,
        acquired: DateTime<Utc>,
        renewed: DateTime<Utc>,
        transitions: i32,
        resource_version: Option<String>,
    ) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: i32::try_from(LEASE_DURATION.as_secs()).ok(),
                acquire_time: Some(MicroTime(acquired)),
                renew_time: Some(MicroTime(renewed)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    /// Hand the lease back so a standby can take over without waiting for expiry
    pub async fn release(&self) -> Result<(), kube::Error> {
        if !self.is_leader.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let Some(mut lease) = api.get_opt(&self.lease_name).await? else {
            return Ok(());
        };
        if let Some(spec) = lease.spec.as_mut() {
            if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
                return Ok(());
            }
            spec.holder_identity = None;
            spec.renew_time = Some(MicroTime(Utc::now() - chrono::Duration::seconds(60)));
        }
        api.replace(&self.lease_name, &PostParams::default(), &lease).await?;
        info!("Released lease {}", self.lease_name);
        Ok(())
    }
}

impl LeaderGate for LeaderElector {
    fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }
}
