//! Controller configuration from environment variables.

use crate::error::ControllerError;
use cluster_lifecycle::LifecycleConfig;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default prefix of inventory labels and the version annotation
pub const DEFAULT_LABEL_PREFIX: &str = "inventory.agent-install.openshift.io/";

/// Controller settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub assisted_service_url: String,
    pub assisted_service_token: Option<String>,
    /// Public base for events and logs URLs
    pub service_base_url: String,
    /// Watch a single namespace; all namespaces when unset
    pub namespace: Option<String>,
    pub label_prefix: String,
    /// Retry delay after a backend error
    pub reconcile_requeue: Duration,
    /// Poll interval of the CSR bootstrap sub-loop
    pub csr_requeue: Duration,
    /// Resync of a settled Agent
    pub resync_interval: Duration,
    pub monitor_interval: Duration,
    pub deleted_retention: Duration,
    /// Deregister clusters idle this long; disabled when unset
    pub inactive_after: Option<Duration>,
    pub object_store_root: PathBuf,
    pub lease_name: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub metrics_addr: SocketAddr,
    pub lifecycle: LifecycleConfig,
}

impl ControllerConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read the configuration through `lookup`; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let assisted_service_url = get("ASSISTED_SERVICE_URL").ok_or_else(|| {
            ControllerError::InvalidConfig("ASSISTED_SERVICE_URL environment variable is required".to_string())
        })?;
        let service_base_url = get("SERVICE_BASE_URL").unwrap_or_else(|| assisted_service_url.clone());

        let seconds = |key: &str, default: u64| -> Result<Duration, ControllerError> {
            parse_number(key, get(key), default).map(Duration::from_secs)
        };
        let hours = |key: &str, default: u64| -> Result<Duration, ControllerError> {
            parse_number(key, get(key), default).map(|h| Duration::from_secs(h * 60 * 60))
        };

        let inactive_after = hours("INACTIVE_CLUSTER_HOURS", 0)?;
        let monitor_batch_size = parse_number("MONITOR_BATCH_SIZE", get("MONITOR_BATCH_SIZE"), 100)?;
        let metrics_addr = get("METRICS_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR: {}", e)))?;
        let pod_name = get("POD_NAME")
            .or_else(|| get("HOSTNAME"))
            .unwrap_or_else(|| "agent-controller".to_string());

        Ok(Self {
            service_base_url: service_base_url.trim_end_matches('/').to_string(),
            assisted_service_url,
            assisted_service_token: get("ASSISTED_SERVICE_TOKEN"),
            namespace: get("WATCH_NAMESPACE"),
            label_prefix: get("AGENT_LABEL_PREFIX").unwrap_or_else(|| DEFAULT_LABEL_PREFIX.to_string()),
            reconcile_requeue: seconds("RECONCILE_REQUEUE_SECONDS", 60)?,
            csr_requeue: seconds("CSR_REQUEUE_SECONDS", 60)?,
            resync_interval: seconds("AGENT_RESYNC_SECONDS", 120)?,
            monitor_interval: seconds("MONITOR_INTERVAL_SECONDS", 10)?,
            deleted_retention: hours("DELETED_RETENTION_HOURS", 72)?,
            inactive_after: (!inactive_after.is_zero()).then_some(inactive_after),
            object_store_root: get("OBJECT_STORE_ROOT")
                .map_or_else(|| PathBuf::from("/var/lib/agent-controller/objects"), PathBuf::from),
            lease_name: get("LEASE_NAME").unwrap_or_else(|| "agent-controller-leader".to_string()),
            pod_name,
            pod_namespace: get("POD_NAMESPACE").unwrap_or_else(|| "default".to_string()),
            metrics_addr,
            lifecycle: LifecycleConfig {
                monitor_batch_size: usize::try_from(monitor_batch_size).unwrap_or(usize::MAX),
                ..LifecycleConfig::default()
            },
        })
    }
}

fn parse_number(key: &str, value: Option<String>, default: u64) -> Result<u64, ControllerError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ControllerError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[("ASSISTED_SERVICE_URL", "http://assisted:8090/")])).unwrap();
        assert_eq!(config.service_base_url, "http://assisted:8090");
        assert_eq!(config.label_prefix, DEFAULT_LABEL_PREFIX);
        assert_eq!(config.reconcile_requeue, Duration::from_secs(60));
        assert_eq!(config.csr_requeue, Duration::from_secs(60));
        assert_eq!(config.monitor_interval, Duration::from_secs(10));
        assert_eq!(config.deleted_retention, Duration::from_secs(72 * 3600));
        assert_eq!(config.inactive_after, None);
        assert_eq!(config.lifecycle.monitor_batch_size, 100);
        assert_eq!(config.metrics_addr.port(), 8080);
        assert!(config.namespace.is_none());
    }

    #[test]
    fn test_missing_service_url() {
        let err = ControllerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(ref m) if m.contains("ASSISTED_SERVICE_URL")));
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("ASSISTED_SERVICE_URL", "http://assisted:8090"),
            ("SERVICE_BASE_URL", "https://assisted.example.com"),
            ("WATCH_NAMESPACE", "agents"),
            ("CSR_REQUEUE_SECONDS", "30"),
            ("INACTIVE_CLUSTER_HOURS", "24"),
            ("MONITOR_BATCH_SIZE", "7"),
        ]))
        .unwrap();
        assert_eq!(config.service_base_url, "https://assisted.example.com");
        assert_eq!(config.namespace.as_deref(), Some("agents"));
        assert_eq!(config.csr_requeue, Duration::from_secs(30));
        assert_eq!(config.inactive_after, Some(Duration::from_secs(24 * 3600)));
        assert_eq!(config.lifecycle.monitor_batch_size, 7);
    }

    #[test]
    fn test_malformed_number() {
        let err = ControllerConfig::from_lookup(lookup(&[
            ("ASSISTED_SERVICE_URL", "http://assisted:8090"),
            ("RECONCILE_REQUEUE_SECONDS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(ref m) if m.contains("RECONCILE_REQUEUE_SECONDS")));
    }
}
