use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Extension,
};

use crate::app::AppState;
use crate::auth::{SCOPE_READ, SCOPE_WRITE};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::registry::{parse_tags, Module, ModuleSource, PayloadContent, Version, VersionMetadata};

use super::form::{read_module_form, ModuleForm};

/// GET /api/modules/:name/versions - Versions in upload order
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
) -> ApiResult<Vec<Version>> {
    user.require(SCOPE_READ)?;
    Ok(ApiResponse::success(state.registry.list_versions(&name).await?))
}

/// POST /api/modules/:name/versions - Upload a new inactive version
///
/// Multipart fields: `version`, optional `description` and `tags`, and
/// exactly one source.
pub async fn upload(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
    multipart: Multipart,
) -> ApiResult<Module> {
    user.require(SCOPE_WRITE)?;

    let form = read_module_form(multipart).await?;
    let label = ModuleForm::required(form.version, "version")?;
    let source = ModuleSource::try_from(form.source)?;
    let metadata = VersionMetadata {
        description: form.description.filter(|d| !d.trim().is_empty()),
        tags: form.tags.map(|t| parse_tags(&t)),
    };

    let module = state
        .registry
        .upload_version(&name, &label, source, metadata, &user.username)
        .await?;
    Ok(ApiResponse::created(module))
}

/// GET /api/modules/:name/versions/:version/artifact
///
/// Zip payloads are streamed back as `application/zip`; git and inline
/// payloads are described in the usual JSON envelope.
pub async fn artifact(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    user.require(SCOPE_READ)?;

    match state.registry.fetch_payload(&name, &version).await? {
        PayloadContent::Archive { filename, bytes } => {
            let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
            Ok((
                [
                    (header::CONTENT_TYPE, "application/zip".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response())
        }
        other => Ok(ApiResponse::success(other).into_response()),
    }
}
