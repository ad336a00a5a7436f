use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::artifact::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
use crate::config::AppConfig;
use crate::coordinator::{DeployCoordinator, HttpCoordinator, LocalCoordinator};
use crate::database::{MemoryStorage, PgStorage, Storage};
use crate::handlers::{protected, public};
use crate::logs::ErrorLog;
use crate::middleware::{jwt_auth_middleware, record_errors};
use crate::registry::{Registry, RegistrySettings};

/// Shared by every handler and middleware
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub errors: Arc<ErrorLog>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire collaborators from configuration: Postgres when a database URL
    /// is set, a runner service when a runner URL is set.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let storage: Arc<dyn Storage> = match &config.registry.database_url {
            Some(url) => {
                let storage = PgStorage::connect(
                    url,
                    config.registry.max_connections,
                    config.registry.connection_timeout,
                )
                .await?;
                storage.migrate().await?;
                Arc::new(storage)
            }
            None => {
                warn!("DATABASE_URL not set; registry state is kept in memory");
                Arc::new(MemoryStorage::new())
            }
        };

        info!(root = %config.registry.artifact_dir.display(), "Using filesystem artifact store");
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(config.registry.artifact_dir.clone()));

        let coordinator: Arc<dyn DeployCoordinator> = match &config.coordinator.runner_url {
            Some(url) => {
                info!(runner = %url, "Using HTTP deploy coordinator");
                Arc::new(HttpCoordinator::new(
                    url,
                    config.coordinator.runner_token.clone(),
                    Duration::from_secs(config.coordinator.request_timeout_secs),
                )?)
            }
            None => {
                warn!("RUNNER_URL not set; deployments are only tracked in-process");
                Arc::new(LocalCoordinator::new())
            }
        };

        Self::assemble(config, storage, artifacts, coordinator).await
    }

    /// Everything in memory; nothing touches disk or network
    pub async fn in_memory(config: AppConfig) -> anyhow::Result<Self> {
        Self::assemble(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryArtifactStore::new()),
            Arc::new(LocalCoordinator::new()),
        )
        .await
    }

    pub async fn assemble(
        config: AppConfig,
        storage: Arc<dyn Storage>,
        artifacts: Arc<dyn ArtifactStore>,
        coordinator: Arc<dyn DeployCoordinator>,
    ) -> anyhow::Result<Self> {
        let registry = Registry::open(
            storage.clone(),
            artifacts,
            coordinator,
            RegistrySettings::from(&config.registry),
        )
        .await?;

        Ok(Self {
            registry: Arc::new(registry),
            errors: Arc::new(ErrorLog::new(storage, config.api.error_log_max_limit)),
            config: Arc::new(config),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .merge(auth_routes())
        .merge(module_routes())
        .merge(log_routes())
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_middleware));

    let mut app = Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .route("/auth/login", post(public::auth::login))
        // Protected API
        .merge(protected_routes)
        .layer(from_fn_with_state(state.clone(), record_errors))
        .layer(DefaultBodyLimit::max(state.config.api.max_request_size_bytes));

    if state.config.security.enable_cors {
        app = app.layer(cors_layer(&state.config.security.cors_origins));
    }
    if state.config.api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }

    app.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

fn auth_routes() -> Router<AppState> {
    use protected::auth;

    Router::new().route("/api/auth/whoami", get(auth::whoami))
}

fn module_routes() -> Router<AppState> {
    use protected::{deploy, history, lifecycle, modules, versions};

    Router::new()
        // Module collection and individual modules
        .route("/api/modules", get(modules::list).post(modules::register))
        .route(
            "/api/modules/:name",
            get(modules::show).patch(modules::update).delete(modules::delete),
        )
        // Versions
        .route("/api/modules/:name/versions", get(versions::list).post(versions::upload))
        .route("/api/modules/:name/versions/:version/artifact", get(versions::artifact))
        // Version lifecycle
        .route("/api/modules/:name/activate", post(lifecycle::activate))
        .route("/api/modules/:name/deactivate", post(lifecycle::deactivate))
        .route("/api/modules/:name/rollback", post(lifecycle::rollback))
        // Standing deployment
        .route("/api/modules/:name/deploy", post(deploy::deploy).delete(deploy::undeploy))
        .route("/api/modules/:name/history", get(history::list))
}

fn log_routes() -> Router<AppState> {
    use protected::logs;

    Router::new().route("/api/logs/errors", get(logs::errors))
}
