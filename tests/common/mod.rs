#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use reqwest::StatusCode as ReqwestStatus;
use serde_json::{json, Value};
use tower::ServiceExt;

use module_console::config::AppConfig;
use module_console::{router, AppState};

/// Router over in-memory collaborators with the development operators
/// (`admin` / `viewer`, both with password `password`).
pub async fn test_app() -> Result<Router> {
    let state = AppState::in_memory(AppConfig::for_tests()).await?;
    Ok(router(state))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

pub async fn send(app: &Router, request: Request<Body>) -> Result<TestResponse> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).with_context(|| format!("non-JSON body: {}", String::from_utf8_lossy(&bytes)))?
    };
    Ok(TestResponse { status, body })
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };
    Ok(request)
}

pub async fn get(app: &Router, uri: &str, token: &str) -> Result<TestResponse> {
    send(app, request(Method::GET, uri, Some(token), None)?).await
}

pub async fn post_json(app: &Router, uri: &str, token: &str, body: Value) -> Result<TestResponse> {
    send(app, request(Method::POST, uri, Some(token), Some(body))?).await
}

pub async fn login(app: &Router, username: &str, password: &str) -> Result<TestResponse> {
    send(
        app,
        request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )?,
    )
    .await
}

pub async fn admin_token(app: &Router) -> Result<String> {
    token_for(app, "admin").await
}

pub async fn token_for(app: &Router, username: &str) -> Result<String> {
    let res = login(app, username, "password").await?;
    anyhow::ensure!(res.status == StatusCode::OK, "login failed: {}", res.body);
    res.body["data"]["token"]
        .as_str()
        .map(str::to_string)
        .context("login response has no token")
}

/// Hand-built multipart/form-data body
pub struct MultipartBody {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: format!("----console-test-{}", uuid::Uuid::new_v4().simple()),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/zip\r\n\r\n",
                self.boundary, name, filename
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn into_request(mut self, uri: &str, token: &str) -> Result<Request<Body>> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Ok(Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", self.boundary),
            )
            .body(Body::from(self.body))?)
    }
}

/// Bytes that pass the zip archive check
pub fn zip_bytes(seed: &str) -> Vec<u8> {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(seed.as_bytes());
    bytes
}

/// Register a venv module from a zip archive
pub async fn register_zip_module(app: &Router, token: &str, name: &str, version: &str) -> Result<TestResponse> {
    let form = MultipartBody::new()
        .text("name", name)
        .text("env", "venv")
        .text("version", version)
        .text("description", "adds two numbers")
        .text("tags", "math, demo")
        .file("file", &format!("{}.zip", name), &zip_bytes(name));
    send(app, form.into_request("/api/modules", token)?).await
}

pub async fn upload_zip_version(app: &Router, token: &str, name: &str, version: &str) -> Result<TestResponse> {
    let form = MultipartBody::new()
        .text("version", version)
        .file("file", &format!("{}-{}.zip", name, version), &zip_bytes(version));
    send(app, form.into_request(&format!("/api/modules/{}/versions", name), token)?).await
}

/// The real server binary on a free port, with in-memory storage. The
/// process is killed when the value is dropped.
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);
        let artifact_dir = std::env::temp_dir().join(format!("module-console-test-{}", port));

        let child = Command::new(env!("CARGO_BIN_EXE_module-console"))
            .env("APP_ENV", "development")
            .env("CONSOLE_HOST", "127.0.0.1")
            .env("CONSOLE_PORT", port.to_string())
            .env("DATABASE_URL", "")
            .env("RUNNER_URL", "")
            .env("REGISTRY_ARTIFACT_DIR", artifact_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == ReqwestStatus::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Spawn a server for the calling test and wait until it answers
pub async fn start_server() -> Result<TestServer> {
    let server = TestServer::spawn()?;
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}
