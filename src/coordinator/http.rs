use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::{CoordinatorError, DeployCoordinator};

/// Coordinator backed by a remote runner service:
/// `POST {base}/deployments/{module}` with `{"version": ...}` starts,
/// `DELETE {base}/deployments/{module}` stops.
pub struct HttpCoordinator {
    client: reqwest::Client,
    base_url: url::Url,
    token: Option<String>,
}

impl HttpCoordinator {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, CoordinatorError> {
        let mut base_url = url::Url::parse(base_url)
            .map_err(|e| CoordinatorError::Transport(format!("invalid runner url '{}': {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoordinatorError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn deployment_url(&self, module: &str) -> Result<url::Url, CoordinatorError> {
        self.base_url
            .join(&format!("deployments/{}", module))
            .map_err(|e| CoordinatorError::Transport(e.to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, CoordinatorError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| CoordinatorError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CoordinatorError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(CoordinatorError::Rejected(format!("{}: {}", status, body.trim())))
        }
    }
}

#[async_trait]
impl DeployCoordinator for HttpCoordinator {
    async fn start(&self, module: &str, version: &str) -> Result<String, CoordinatorError> {
        let url = self.deployment_url(module)?;
        self.send(self.client.post(url).json(&json!({ "version": version }))).await
    }

    async fn stop(&self, module: &str) -> Result<String, CoordinatorError> {
        let url = self.deployment_url(module)?;
        self.send(self.client.delete(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_deployment_urls_under_base_path() {
        let coordinator = HttpCoordinator::new("http://runner:9000/api", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            coordinator.deployment_url("m1").unwrap().as_str(),
            "http://runner:9000/api/deployments/m1"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(HttpCoordinator::new("not a url", None, Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn unreachable_runner_is_transport_error() {
        let port = portpicker::pick_unused_port().expect("free port");
        let coordinator =
            HttpCoordinator::new(&format!("http://127.0.0.1:{}", port), None, Duration::from_secs(2)).unwrap();
        let err = coordinator.start("m1", "1.0.0").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Transport(_)));
    }
}
