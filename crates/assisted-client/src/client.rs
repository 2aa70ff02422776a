//! Installer backend REST client
//!
//! Implements `InstallerClientTrait` against the v2 REST API. Host mutations
//! are addressed by infra-env and host id:
//! `/api/assisted-install/v2/infra-envs/{infra_env_id}/hosts/{host_id}`.

use crate::error::InstallerError;
use crate::installer_args::InstallerArgs;
use crate::installer_trait::InstallerClientTrait;
use crate::models::*;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const API_PREFIX: &str = "/api/assisted-install/v2";

/// Installer backend client
#[derive(Debug, Clone)]
pub struct InstallerClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl InstallerClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - Backend base URL (e.g., "http://assisted-service:8090")
    /// * `token` - Optional bearer token sent on every request
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, InstallerError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn host_url(&self, infra_env_id: Uuid, host_id: Uuid) -> String {
        format!("{}{}/infra-envs/{}/hosts/{}", self.base_url, API_PREFIX, infra_env_id, host_id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Map a non-success response onto the error taxonomy
    async fn check(response: Response, context: &str) -> Result<Response, InstallerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = format!("{}: {} - {}", context, status, body);
        Err(match status {
            StatusCode::NOT_FOUND => InstallerError::NotFound(detail),
            StatusCode::CONFLICT => InstallerError::Conflict(detail),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => InstallerError::Authentication(detail),
            StatusCode::BAD_REQUEST => InstallerError::InvalidRequest(detail),
            _ => InstallerError::Api(detail),
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, InstallerError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            InstallerError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    async fn send_json<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: &B,
        context: &str,
    ) -> Result<T, InstallerError> {
        debug!("{} {}", method, url);
        let response = self.request(method, url).json(body).send().await?;
        let response = Self::check(response, context).await?;
        Self::decode(response).await
    }
}

#[async_trait::async_trait]
impl InstallerClientTrait for InstallerClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_host_by_kube_key(&self, key: &KubeKey) -> Result<Host, InstallerError> {
        let url = format!("{}{}/hosts/by-kube-key/{}/{}", self.base_url, API_PREFIX, key.namespace, key.name);
        debug!("GET {}", url);
        let response = self.request(Method::GET, &url).send().await?;
        let response = Self::check(response, &format!("Failed to get host {}", key)).await?;
        Self::decode(response).await
    }

    async fn get_cluster_by_kube_key(&self, key: &KubeKey) -> Result<Cluster, InstallerError> {
        let url = format!("{}{}/clusters/by-kube-key/{}/{}", self.base_url, API_PREFIX, key.namespace, key.name);
        debug!("GET {}", url);
        let response = self.request(Method::GET, &url).send().await?;
        let response = Self::check(response, &format!("Failed to get cluster {}", key)).await?;
        Self::decode(response).await
    }

    async fn update_host(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        params: &HostUpdateParams,
    ) -> Result<Host, InstallerError> {
        let url = self.host_url(infra_env_id, host_id);
        self.send_json(Method::PATCH, &url, params, &format!("Failed to update host {}", host_id))
            .await
    }

    async fn update_host_approved(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        cluster_id: Option<Uuid>,
        approved: bool,
    ) -> Result<(), InstallerError> {
        let url = format!("{}/approved", self.host_url(infra_env_id, host_id));
        let body = serde_json::json!({ "approved": approved, "cluster_id": cluster_id });
        debug!("PATCH {}", url);
        let response = self.request(Method::PATCH, &url).json(&body).send().await?;
        Self::check(response, &format!("Failed to update approval of host {}", host_id)).await?;
        Ok(())
    }

    async fn update_host_ignition(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        overrides: &str,
    ) -> Result<Host, InstallerError> {
        let url = format!("{}/ignition", self.host_url(infra_env_id, host_id));
        let body = serde_json::json!({ "config": overrides });
        self.send_json(Method::PATCH, &url, &body, &format!("Failed to update ignition of host {}", host_id))
            .await
    }

    async fn update_host_installer_args(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        args: &InstallerArgs,
    ) -> Result<Host, InstallerError> {
        let url = format!("{}/installer-args", self.host_url(infra_env_id, host_id));
        let body = serde_json::json!({ "args": args });
        self.send_json(
            Method::PATCH,
            &url,
            &body,
            &format!("Failed to update installer args of host {}", host_id),
        )
        .await
    }

    async fn bind_host(&self, host_id: Uuid, infra_env_id: Uuid, cluster_id: Uuid) -> Result<Host, InstallerError> {
        let url = format!("{}/actions/bind", self.host_url(infra_env_id, host_id));
        let body = serde_json::json!({ "cluster_id": cluster_id });
        self.send_json(Method::POST, &url, &body, &format!("Failed to bind host {}", host_id))
            .await
    }

    async fn unbind_host(&self, host_id: Uuid, infra_env_id: Uuid, reason: &str) -> Result<Host, InstallerError> {
        let url = format!("{}/actions/unbind", self.host_url(infra_env_id, host_id));
        let body = serde_json::json!({ "reason": reason });
        self.send_json(Method::POST, &url, &body, &format!("Failed to unbind host {}", host_id))
            .await
    }

    async fn update_host_install_progress(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        stage: HostStage,
        info: &str,
    ) -> Result<(), InstallerError> {
        let url = format!("{}/progress", self.host_url(infra_env_id, host_id));
        let body = serde_json::json!({ "current_stage": stage, "progress_info": info });
        debug!("PUT {}", url);
        let response = self.request(Method::PUT, &url).json(&body).send().await?;
        Self::check(response, &format!("Failed to update progress of host {}", host_id)).await?;
        Ok(())
    }

    async fn deregister_host(&self, host_id: Uuid, infra_env_id: Uuid) -> Result<(), InstallerError> {
        let url = self.host_url(infra_env_id, host_id);
        debug!("DELETE {}", url);
        let response = self.request(Method::DELETE, &url).send().await?;
        Self::check(response, &format!("Failed to deregister host {}", host_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = InstallerClient::new("http://assisted:8090/".to_string(), None).unwrap();
        assert_eq!(client.base_url(), "http://assisted:8090");
    }

    #[test]
    fn test_host_url_layout() {
        let client = InstallerClient::new("http://assisted:8090".to_string(), None).unwrap();
        let infra_env = Uuid::nil();
        let host = Uuid::from_u128(1);
        assert_eq!(
            client.host_url(infra_env, host),
            format!("http://assisted:8090/api/assisted-install/v2/infra-envs/{}/hosts/{}", infra_env, host)
        );
    }
}
