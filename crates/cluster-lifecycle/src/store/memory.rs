//! In-memory cluster store

use super::{ClusterStore, ClusterUpdate, DependentRecord};
use crate::error::StoreError;
use assisted_client::{Cluster, ClusterStatus, KubeKey};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    clusters: BTreeMap<Uuid, Cluster>,
    purged_records: Vec<(Uuid, DependentRecord)>,
    fail_updates: bool,
}

/// Store backed by a map, used by tests and single-process setups
#[derive(Debug, Clone, Default)]
pub struct MemoryClusterStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Backend(format!("store lock poisoned: {}", e)))
    }

    /// Cluster as stored, including soft-deleted ones
    pub fn snapshot(&self, id: Uuid) -> Option<Cluster> {
        self.lock().ok().and_then(|inner| inner.clusters.get(&id).cloned())
    }

    /// Overwrite a stored cluster directly, bypassing transitions
    pub fn put(&self, cluster: Cluster) {
        if let Ok(mut inner) = self.lock() {
            inner.clusters.insert(cluster.id, cluster);
        }
    }

    /// Make every `update_cluster` fail with a backend error
    pub fn fail_updates(&self, fail: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_updates = fail;
        }
    }

    pub fn purged_records(&self) -> Vec<(Uuid, DependentRecord)> {
        self.lock().map(|inner| inner.purged_records.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ClusterStore for MemoryClusterStore {
    async fn get_cluster(&self, id: Uuid) -> Result<Cluster, StoreError> {
        self.lock()?
            .clusters
            .get(&id)
            .filter(|c| c.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", id)))
    }

    async fn get_cluster_by_kube_key(&self, key: &KubeKey) -> Result<Cluster, StoreError> {
        self.lock()?
            .clusters
            .values()
            .find(|c| c.deleted_at.is_none() && c.kube_key.as_ref() == Some(key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", key)))
    }

    async fn list_clusters(&self, offset: usize, limit: usize) -> Result<Vec<Cluster>, StoreError> {
        Ok(self
            .lock()?
            .clusters
            .values()
            .filter(|c| c.deleted_at.is_none())
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_cluster(&self, cluster: &Cluster) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.clusters.contains_key(&cluster.id) {
            return Err(StoreError::Conflict(format!("cluster {} already exists", cluster.id)));
        }
        inner.clusters.insert(cluster.id, cluster.clone());
        Ok(())
    }

    async fn update_cluster(
        &self,
        id: Uuid,
        expected_status: Option<ClusterStatus>,
        update: &ClusterUpdate,
    ) -> Result<Cluster, StoreError> {
        let mut inner = self.lock()?;
        if inner.fail_updates {
            return Err(StoreError::Backend("update failed".to_string()));
        }
        let cluster = inner
            .clusters
            .get_mut(&id)
            .filter(|c| c.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", id)))?;
        if let Some(expected) = expected_status {
            if cluster.status != expected {
                return Err(StoreError::Conflict(format!(
                    "cluster {} is in status {}, expected {}",
                    id, cluster.status, expected
                )));
            }
        }
        update.apply(cluster, Utc::now());
        Ok(cluster.clone())
    }

    async fn list_inactive_clusters(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Cluster>, StoreError> {
        Ok(self
            .lock()?
            .clusters
            .values()
            .filter(|c| c.deleted_at.is_none() && c.updated_at.is_some_and(|u| u < since))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn soft_delete_cluster(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let cluster = inner
            .clusters
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", id)))?;
        cluster.deleted_at = Some(at);
        Ok(())
    }

    async fn list_deleted_clusters(&self, older_than: DateTime<Utc>) -> Result<Vec<Cluster>, StoreError> {
        Ok(self
            .lock()?
            .clusters
            .values()
            .filter(|c| c.deleted_at.is_some_and(|d| d < older_than))
            .cloned()
            .collect())
    }

    async fn delete_dependent_records(&self, id: Uuid, kind: DependentRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if kind == DependentRecord::Hosts {
            if let Some(cluster) = inner.clusters.get_mut(&id) {
                cluster.hosts.clear();
            }
        }
        inner.purged_records.push((id, kind));
        Ok(())
    }

    async fn purge_cluster(&self, id: Uuid) -> Result<(), StoreError> {
        self.lock()?
            .clusters
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ClusterUpdate;

    fn cluster(status: ClusterStatus) -> Cluster {
        Cluster {
            id: Uuid::new_v4(),
            status,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_conditional_update_conflicts_on_stale_status() {
        let store = MemoryClusterStore::new();
        let c = cluster(ClusterStatus::Ready);
        store.insert_cluster(&c).await.unwrap();

        let update = ClusterUpdate {
            status: Some(ClusterStatus::PreparingForInstallation),
            ..Default::default()
        };
        store.update_cluster(c.id, Some(ClusterStatus::Ready), &update).await.unwrap();
        let err = store
            .update_cluster(c.id, Some(ClusterStatus::Ready), &update)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_soft_deleted_cluster_hidden() {
        let store = MemoryClusterStore::new();
        let c = cluster(ClusterStatus::Insufficient);
        store.insert_cluster(&c).await.unwrap();
        store.soft_delete_cluster(c.id, Utc::now()).await.unwrap();

        assert!(matches!(store.get_cluster(c.id).await, Err(StoreError::NotFound(_))));
        assert!(store.list_clusters(0, 10).await.unwrap().is_empty());
        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.list_deleted_clusters(later).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_pages() {
        let store = MemoryClusterStore::new();
        for _ in 0..5 {
            store.insert_cluster(&cluster(ClusterStatus::Ready)).await.unwrap();
        }
        assert_eq!(store.list_clusters(0, 2).await.unwrap().len(), 2);
        assert_eq!(store.list_clusters(4, 2).await.unwrap().len(), 1);
        assert!(store.list_clusters(5, 2).await.unwrap().is_empty());
    }
}
