//! Lifecycle metrics
//!
//! `MetricsApi` is injected into the manager. Every call site goes through
//! `report`, which logs failures and carries on.

use crate::error::CollaboratorError;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Metrics emitted by the lifecycle manager
pub trait MetricsApi: Send + Sync {
    fn cluster_validation_failed(&self, cluster_id: Uuid, validation_id: &str) -> Result<(), CollaboratorError>;

    fn host_validation_failed(&self, host_id: Uuid, validation_id: &str) -> Result<(), CollaboratorError>;

    fn cluster_validation_changed(
        &self,
        cluster_id: Uuid,
        validation_id: &str,
        status: &str,
    ) -> Result<(), CollaboratorError>;

    /// `result` is the cluster status the installation ended in
    fn installation_completed(
        &self,
        cluster_id: Uuid,
        result: &str,
        duration: Option<Duration>,
    ) -> Result<(), CollaboratorError>;

    fn monitored_clusters(&self, count: usize) -> Result<(), CollaboratorError>;

    fn monitor_duration(&self, duration: Duration) -> Result<(), CollaboratorError>;
}

/// Log a metrics failure without propagating it
pub fn report(result: Result<(), CollaboratorError>, what: &str) {
    if let Err(e) = result {
        warn!("Failed to report {} metric: {}", what, e);
    }
}

/// Discards every metric
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsApi for NoopMetrics {
    fn cluster_validation_failed(&self, _cluster_id: Uuid, _validation_id: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn host_validation_failed(&self, _host_id: Uuid, _validation_id: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn cluster_validation_changed(&self, _cluster_id: Uuid, _validation_id: &str, _status: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn installation_completed(&self, _cluster_id: Uuid, _result: &str, _duration: Option<Duration>) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn monitored_clusters(&self, _count: usize) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn monitor_duration(&self, _duration: Duration) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Prometheus-backed metrics
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    cluster_validation_failed: IntCounterVec,
    host_validation_failed: IntCounterVec,
    cluster_validation_changed: IntCounterVec,
    installation_completed: IntCounterVec,
    install_duration: Histogram,
    monitored_clusters: IntGauge,
    monitor_duration: Histogram,
}

fn prom_err(e: prometheus::Error) -> CollaboratorError {
    CollaboratorError::new(e.to_string())
}

impl PrometheusMetrics {
    /// Create the collectors and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let cluster_validation_failed = IntCounterVec::new(
            Opts::new(
                "cluster_validation_failed_total",
                "Cluster validations that turned from success to failure",
            ),
            &["validation"],
        )?;
        let host_validation_failed = IntCounterVec::new(
            Opts::new(
                "host_validation_failed_total",
                "Host validations failing when the cluster was deregistered",
            ),
            &["validation"],
        )?;
        let cluster_validation_changed = IntCounterVec::new(
            Opts::new("cluster_validation_changed_total", "Cluster validation status changes"),
            &["validation", "status"],
        )?;
        let installation_completed = IntCounterVec::new(
            Opts::new("cluster_installation_completed_total", "Finished cluster installations"),
            &["result"],
        )?;
        let install_duration = Histogram::with_opts(
            HistogramOpts::new("cluster_install_duration_seconds", "Cluster installation duration")
                .buckets(vec![600.0, 1200.0, 1800.0, 2700.0, 3600.0, 5400.0, 7200.0, 14400.0]),
        )?;
        let monitored_clusters = IntGauge::new("monitored_clusters", "Clusters visited by the last monitoring sweep")?;
        let monitor_duration = Histogram::with_opts(HistogramOpts::new(
            "monitor_duration_seconds",
            "Duration of a monitoring sweep",
        ))?;

        registry.register(Box::new(cluster_validation_failed.clone()))?;
        registry.register(Box::new(host_validation_failed.clone()))?;
        registry.register(Box::new(cluster_validation_changed.clone()))?;
        registry.register(Box::new(installation_completed.clone()))?;
        registry.register(Box::new(install_duration.clone()))?;
        registry.register(Box::new(monitored_clusters.clone()))?;
        registry.register(Box::new(monitor_duration.clone()))?;

        Ok(Self {
            cluster_validation_failed,
            host_validation_failed,
            cluster_validation_changed,
            installation_completed,
            install_duration,
            monitored_clusters,
            monitor_duration,
        })
    }
}

impl MetricsApi for PrometheusMetrics {
    fn cluster_validation_failed(&self, _cluster_id: Uuid, validation_id: &str) -> Result<(), CollaboratorError> {
        self.cluster_validation_failed
            .get_metric_with_label_values(&[validation_id])
            .map_err(prom_err)?
            .inc();
        Ok(())
    }

    fn host_validation_failed(&self, _host_id: Uuid, validation_id: &str) -> Result<(), CollaboratorError> {
        self.host_validation_failed
            .get_metric_with_label_values(&[validation_id])
            .map_err(prom_err)?
            .inc();
        Ok(())
    }

    fn cluster_validation_changed(&self, _cluster_id: Uuid, validation_id: &str, status: &str) -> Result<(), CollaboratorError> {
        self.cluster_validation_changed
            .get_metric_with_label_values(&[validation_id, status])
            .map_err(prom_err)?
            .inc();
        Ok(())
    }

    fn installation_completed(&self, _cluster_id: Uuid, result: &str, duration: Option<Duration>) -> Result<(), CollaboratorError> {
        self.installation_completed
            .get_metric_with_label_values(&[result])
            .map_err(prom_err)?
            .inc();
        if let Some(duration) = duration {
            self.install_duration.observe(duration.as_secs_f64());
        }
        Ok(())
    }

    fn monitored_clusters(&self, count: usize) -> Result<(), CollaboratorError> {
        let count = i64::try_from(count).map_err(|e| CollaboratorError::new(e.to_string()))?;
        self.monitored_clusters.set(count);
        Ok(())
    }

    fn monitor_duration(&self, duration: Duration) -> Result<(), CollaboratorError> {
        self.monitor_duration.observe(duration.as_secs_f64());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_metrics_register_and_count() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();
        metrics.cluster_validation_failed(Uuid::nil(), "pull-secret-set").unwrap();
        metrics.cluster_validation_failed(Uuid::nil(), "pull-secret-set").unwrap();
        metrics
            .installation_completed(Uuid::nil(), "installed", Some(Duration::from_secs(1800)))
            .unwrap();
        metrics.monitored_clusters(4).unwrap();

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains("cluster_validation_failed_total{validation=\"pull-secret-set\"} 2"));
        assert!(text.contains("cluster_installation_completed_total{result=\"installed\"} 1"));
        assert!(text.contains("monitored_clusters 4"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        PrometheusMetrics::new(&registry).unwrap();
        assert!(PrometheusMetrics::new(&registry).is_err());
    }
}
