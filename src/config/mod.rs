use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::auth::{hash_password, SCOPE_READ, SCOPE_WRITE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub coordinator: CoordinatorConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Postgres connection string; in-memory storage when unset
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub artifact_dir: PathBuf,
    pub deploy_timeout_secs: u64,
    pub default_version_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Base URL of the runner service; the local coordinator is used when unset
    pub runner_url: Option<String>,
    pub runner_token: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
    pub error_log_max_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub operators: Vec<OperatorAccount>,
}

/// A console login. `password_hash` is `salt$sha256hex` (see `auth::hash_password`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorAccount {
    pub username: String,
    pub password_hash: String,
    pub scopes: Vec<String>,
}

impl OperatorAccount {
    pub fn new(username: &str, password: &str, scopes: &[&str]) -> Self {
        Self {
            username: username.to_string(),
            password_hash: hash_password(username, password),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Ok(v) = env::var("CONSOLE_HOST") {
            self.server.host = v;
        }
        if let Some(v) = env::var("CONSOLE_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }

        // Registry overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.registry.database_url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.registry.max_connections = v.parse().unwrap_or(self.registry.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.registry.connection_timeout = v.parse().unwrap_or(self.registry.connection_timeout);
        }
        if let Ok(v) = env::var("REGISTRY_ARTIFACT_DIR") {
            self.registry.artifact_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("REGISTRY_DEPLOY_TIMEOUT_SECS") {
            self.registry.deploy_timeout_secs = v.parse().unwrap_or(self.registry.deploy_timeout_secs);
        }
        if let Ok(v) = env::var("REGISTRY_DEFAULT_VERSION") {
            if !v.trim().is_empty() {
                self.registry.default_version_label = v.trim().to_string();
            }
        }

        // Coordinator overrides
        if let Ok(v) = env::var("RUNNER_URL") {
            self.coordinator.runner_url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("RUNNER_TOKEN") {
            self.coordinator.runner_token = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("RUNNER_REQUEST_TIMEOUT_SECS") {
            self.coordinator.request_timeout_secs = v.parse().unwrap_or(self.coordinator.request_timeout_secs);
        }

        // API overrides
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }
        if let Ok(v) = env::var("API_ERROR_LOG_MAX_LIMIT") {
            self.api.error_log_max_limit = v.parse().unwrap_or(self.api.error_log_max_limit);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(password) = env::var("CONSOLE_ADMIN_PASSWORD") {
            let username = env::var("CONSOLE_ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
            self.security.operators.retain(|op| op.username != username);
            self.security
                .operators
                .push(OperatorAccount::new(&username, &password, &[SCOPE_READ, SCOPE_WRITE]));
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            registry: RegistryConfig {
                database_url: None,
                max_connections: 5,
                connection_timeout: 30,
                artifact_dir: PathBuf::from("./data/artifacts"),
                deploy_timeout_secs: 120,
                default_version_label: "0.1.0".to_string(),
            },
            coordinator: CoordinatorConfig {
                runner_url: None,
                runner_token: None,
                request_timeout_secs: 60,
            },
            api: ApiConfig {
                enable_request_logging: true,
                max_request_size_bytes: 50 * 1024 * 1024, // 50MB
                error_log_max_limit: 1000,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                jwt_secret: "development-secret-change-me".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                operators: vec![
                    OperatorAccount::new("admin", "password", &[SCOPE_READ, SCOPE_WRITE]),
                    OperatorAccount::new("viewer", "password", &[SCOPE_READ]),
                ],
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            registry: RegistryConfig {
                database_url: None,
                max_connections: 10,
                connection_timeout: 10,
                artifact_dir: PathBuf::from("/var/lib/module-console/artifacts"),
                deploy_timeout_secs: 300,
                default_version_label: "0.1.0".to_string(),
            },
            coordinator: CoordinatorConfig {
                runner_url: None,
                runner_token: None,
                request_timeout_secs: 120,
            },
            api: ApiConfig {
                enable_request_logging: true,
                max_request_size_bytes: 100 * 1024 * 1024, // 100MB
                error_log_max_limit: 500,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
                operators: Vec::new(),
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            registry: RegistryConfig {
                database_url: None,
                max_connections: 20,
                connection_timeout: 5,
                artifact_dir: PathBuf::from("/var/lib/module-console/artifacts"),
                deploy_timeout_secs: 300,
                default_version_label: "0.1.0".to_string(),
            },
            coordinator: CoordinatorConfig {
                runner_url: None,
                runner_token: None,
                request_timeout_secs: 120,
            },
            api: ApiConfig {
                enable_request_logging: false,
                max_request_size_bytes: 100 * 1024 * 1024, // 100MB
                error_log_max_limit: 200,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://console.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                operators: Vec::new(),
            },
        }
    }

    pub fn operator(&self, username: &str) -> Option<&OperatorAccount> {
        self.security.operators.iter().find(|op| op.username == username)
    }

    /// Configuration used by in-process tests: development defaults with
    /// no environment overrides applied.
    pub fn for_tests() -> Self {
        Self::development()
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

// Helper macros for common checks
#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}
