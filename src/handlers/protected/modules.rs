use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    Extension, Json,
};

use crate::app::AppState;
use crate::auth::{SCOPE_READ, SCOPE_WRITE};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::registry::{parse_tags, MetadataPatch, Module, ModuleFilter, ModuleSource, RegisterModule, RegistryError};
use crate::types::ModuleEnv;

use super::form::{read_module_form, ModuleForm};

/// GET /api/modules?env=docker&tag=ml - Modules sorted by name, optionally
/// narrowed to one env and/or one tag
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    query: Result<Query<ModuleFilter>, QueryRejection>,
) -> ApiResult<Vec<Module>> {
    user.require(SCOPE_READ)?;
    let Query(filter) = query?;
    Ok(ApiResponse::success(state.registry.list_modules(&filter).await))
}

/// POST /api/modules - Register a module with its first version
///
/// Multipart fields: `name`, `env`, optional `version`, `description`,
/// `tags` (comma separated), and exactly one source: `file` (zip),
/// `git_uri`, or `code` + `input_schema`.
pub async fn register(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    multipart: Multipart,
) -> ApiResult<Module> {
    user.require(SCOPE_WRITE)?;

    let form = read_module_form(multipart).await?;
    let name = ModuleForm::required(form.name, "name")?;
    let env: ModuleEnv = ModuleForm::required(form.env, "env")?
        .parse()
        .map_err(RegistryError::InvalidInput)?;
    let source = ModuleSource::try_from(form.source)?;

    let module = state
        .registry
        .register_module(
            RegisterModule {
                name,
                env,
                source,
                version: form.version,
                description: form.description,
                tags: form
                    .tags
                    .map(|t| parse_tags(&t).into_iter().collect())
                    .unwrap_or_default(),
            },
            &user.username,
        )
        .await?;

    Ok(ApiResponse::created(module))
}

/// GET /api/modules/:name
pub async fn show(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
) -> ApiResult<Module> {
    user.require(SCOPE_READ)?;
    Ok(ApiResponse::success(state.registry.get_module(&name).await?))
}

/// PATCH /api/modules/:name - Edit description and tags
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
    body: Result<Json<MetadataPatch>, JsonRejection>,
) -> ApiResult<Module> {
    user.require(SCOPE_WRITE)?;
    let Json(patch) = body?;
    Ok(ApiResponse::success(state.registry.update_metadata(&name, patch).await?))
}

/// DELETE /api/modules/:name - Remove the module and every version
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
) -> ApiResult<Module> {
    user.require(SCOPE_WRITE)?;
    Ok(ApiResponse::success(
        state.registry.delete_module(&name, &user.username).await?,
    ))
}
