use reqwest::{multipart::Form, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::config::{load_auth, load_server};

/// Thin wrapper over the console API that unwraps the JSON envelope
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    /// Client for the configured server, with the stored token if any
    pub fn from_config() -> anyhow::Result<Self> {
        let server = load_server()?
            .ok_or_else(|| anyhow::anyhow!("No server configured. Run `modctl server set <url>` first"))?;

        let token = match load_auth()? {
            Some(auth) if auth.server == server.url && !auth.is_expired() => Some(auth.token),
            _ => None,
        };

        Ok(Self::new(&server.url, token))
    }

    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.send(self.request(Method::GET, path)).await
    }

    pub async fn get_query<T: DeserializeOwned, Q: Serialize>(&self, path: &str, query: &Q) -> anyhow::Result<T> {
        self.send(self.request(Method::GET, path).query(query)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<T> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.send(self.request(Method::POST, path)).await
    }

    pub async fn patch_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<T> {
        self.send(self.request(Method::PATCH, path).json(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.send(self.request(Method::DELETE, path)).await
    }

    pub async fn post_multipart<T: DeserializeOwned>(&self, path: &str, form: Form) -> anyhow::Result<T> {
        self.send(self.request(Method::POST, path).multipart(form)).await
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> anyhow::Result<T> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let detail = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            anyhow::bail!("{} ({}). Run `modctl auth login` to re-authenticate", detail, status);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Unexpected response from server ({}): {}", status, e))?;

        if !status.is_success() || body.get("success") != Some(&Value::Bool(true)) {
            let message = body.get("error").and_then(Value::as_str).unwrap_or("request failed");
            match body.get("kind").and_then(Value::as_str) {
                Some(kind) => anyhow::bail!("{}: {}", kind, message),
                None => anyhow::bail!("{} ({})", message, status),
            }
        }

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }
}

/// Path segment for a module name or version label
pub fn segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
