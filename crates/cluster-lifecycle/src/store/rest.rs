//! Cluster store backed by the installer backend's internal REST API

use super::{ClusterStore, ClusterUpdate, DependentRecord};
use crate::error::StoreError;
use assisted_client::{Cluster, ClusterStatus, KubeKey};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const API_PREFIX: &str = "/api/assisted-install/v2/internal";

#[derive(Debug, Clone)]
pub struct RestClusterStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct ConditionalUpdate<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_status: Option<ClusterStatus>,
    update: &'a ClusterUpdate,
}

fn http_err(e: reqwest::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl RestClusterStore {
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(http_err)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url).header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: Response, context: &str) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = format!("{}: {} - {}", context, status, body);
        Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(detail),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => StoreError::Conflict(detail),
            _ => StoreError::Backend(detail),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, context: &str) -> Result<T, StoreError> {
        let response = self.request(Method::GET, url).send().await.map_err(http_err)?;
        let response = Self::check(response, context).await?;
        response.json().await.map_err(http_err)
    }

    async fn send_empty(&self, method: Method, url: &str, context: &str) -> Result<(), StoreError> {
        let response = self.request(method, url).send().await.map_err(http_err)?;
        Self::check(response, context).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterStore for RestClusterStore {
    async fn get_cluster(&self, id: Uuid) -> Result<Cluster, StoreError> {
        self.get_json(&self.url(&format!("/clusters/{}", id)), &format!("get cluster {}", id))
            .await
    }

    async fn get_cluster_by_kube_key(&self, key: &KubeKey) -> Result<Cluster, StoreError> {
        let url = self.url(&format!("/clusters/by-kube-key/{}/{}", key.namespace, key.name));
        self.get_json(&url, &format!("get cluster {}", key)).await
    }

    async fn list_clusters(&self, offset: usize, limit: usize) -> Result<Vec<Cluster>, StoreError> {
        let url = self.url(&format!("/clusters?offset={}&limit={}", offset, limit));
        self.get_json(&url, "list clusters").await
    }

    async fn insert_cluster(&self, cluster: &Cluster) -> Result<(), StoreError> {
        let response = self
            .request(Method::POST, &self.url("/clusters"))
            .json(cluster)
            .send()
            .await
            .map_err(http_err)?;
        Self::check(response, &format!("insert cluster {}", cluster.id)).await?;
        Ok(())
    }

    async fn update_cluster(
        &self,
        id: Uuid,
        expected_status: Option<ClusterStatus>,
        update: &ClusterUpdate,
    ) -> Result<Cluster, StoreError> {
        let body = ConditionalUpdate { expected_status, update };
        let response = self
            .request(Method::PATCH, &self.url(&format!("/clusters/{}", id)))
            .json(&body)
            .send()
            .await
            .map_err(http_err)?;
        let response = Self::check(response, &format!("update cluster {}", id)).await?;
        response.json().await.map_err(http_err)
    }

    async fn list_inactive_clusters(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Cluster>, StoreError> {
        let url = self.url(&format!("/clusters?updated_before={}&limit={}", timestamp(since), limit));
        self.get_json(&url, "list inactive clusters").await
    }

    async fn soft_delete_cluster(&self, id: Uuid, _at: DateTime<Utc>) -> Result<(), StoreError> {
        self.send_empty(
            Method::DELETE,
            &self.url(&format!("/clusters/{}", id)),
            &format!("delete cluster {}", id),
        )
        .await
    }

    async fn list_deleted_clusters(&self, older_than: DateTime<Utc>) -> Result<Vec<Cluster>, StoreError> {
        let url = self.url(&format!("/clusters?deleted_before={}", timestamp(older_than)));
        self.get_json(&url, "list deleted clusters").await
    }

    async fn delete_dependent_records(&self, id: Uuid, kind: DependentRecord) -> Result<(), StoreError> {
        self.send_empty(
            Method::DELETE,
            &self.url(&format!("/clusters/{}/{}", id, kind)),
            &format!("delete {} of cluster {}", kind, id),
        )
        .await
    }

    async fn purge_cluster(&self, id: Uuid) -> Result<(), StoreError> {
        self.send_empty(
            Method::DELETE,
            &self.url(&format!("/clusters/{}?permanently=true", id)),
            &format!("purge cluster {}", id),
        )
        .await
    }
}
