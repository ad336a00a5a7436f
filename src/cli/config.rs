use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub url: String,
    pub added_at: DateTime<Utc>,
    pub last_ping: Option<DateTime<Utc>>,
    pub status: ServerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Up,
    Down,
    Unknown,
}

/// Token from the last successful `auth login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    pub server: String,
    pub username: String,
    pub token: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl ServerInfo {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let parsed = url::Url::parse(url).map_err(|e| anyhow::anyhow!("invalid server URL '{}': {}", url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("server URL must use http or https");
        }

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            added_at: Utc::now(),
            last_ping: None,
            status: ServerStatus::Unknown,
        })
    }

    pub fn update_ping(&mut self, status: ServerStatus) {
        self.last_ping = Some(Utc::now());
        self.status = status;
    }
}

impl AuthInfo {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    let config_dir = if let Ok(custom_dir) = std::env::var("MODCTL_CONFIG_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME environment variable not set"))?;
        PathBuf::from(home).join(".config").join("modctl").join("cli")
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn load<T: for<'de> Deserialize<'de>>(file: &str) -> anyhow::Result<Option<T>> {
    let path = get_config_dir()?.join(file);
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

fn save<T: Serialize>(file: &str, value: &T) -> anyhow::Result<()> {
    let path = get_config_dir()?.join(file);
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

fn remove(file: &str) -> anyhow::Result<bool> {
    let path = get_config_dir()?.join(file);
    if path.exists() {
        fs::remove_file(path)?;
        return Ok(true);
    }
    Ok(false)
}

pub fn load_server() -> anyhow::Result<Option<ServerInfo>> {
    load("server.json")
}

pub fn save_server(server: &ServerInfo) -> anyhow::Result<()> {
    save("server.json", server)
}

pub fn load_auth() -> anyhow::Result<Option<AuthInfo>> {
    load("auth.json")
}

pub fn save_auth(auth: &AuthInfo) -> anyhow::Result<()> {
    save("auth.json", auth)
}

/// Returns whether a token was stored
pub fn clear_auth() -> anyhow::Result<bool> {
    remove("auth.json")
}

pub async fn ping_server(server_info: &ServerInfo) -> ServerStatus {
    let client = reqwest::Client::new();
    let url = format!("{}/health", server_info.url);

    match client.get(&url).timeout(std::time::Duration::from_secs(5)).send().await {
        Ok(response) if response.status().is_success() => ServerStatus::Up,
        _ => ServerStatus::Down,
    }
}
