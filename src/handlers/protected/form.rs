// Multipart form shared by module registration and version upload

use axum::extract::{multipart::Field, Multipart};

use crate::error::ApiError;
use crate::registry::{RegistryError, SourceInput, UploadedFile};

#[derive(Debug, Default)]
pub struct ModuleForm {
    pub name: Option<String>,
    pub env: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub source: SourceInput,
}

impl ModuleForm {
    /// Required text field, reported as invalid input when missing or blank
    pub fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RegistryError::InvalidInput(format!("{} is required", field)).into())
    }
}

pub async fn read_module_form(mut multipart: Multipart) -> Result<ModuleForm, ApiError> {
    let mut form = ModuleForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read uploaded file: {}", e)))?;
                // Browsers send an empty part when no file was picked
                if !filename.is_empty() || !bytes.is_empty() {
                    form.source.file = Some(UploadedFile {
                        filename,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            "name" => form.name = Some(text(field).await?),
            "env" => form.env = Some(text(field).await?),
            "version" => form.version = Some(text(field).await?),
            "description" => form.description = Some(text(field).await?),
            "tags" => form.tags = Some(text(field).await?),
            "git_uri" => form.source.git_uri = Some(text(field).await?),
            "code" => form.source.code = Some(text(field).await?),
            "input" | "input_schema" => form.source.input_schema = Some(text(field).await?),
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

async fn text(field: Field<'_>) -> Result<String, ApiError> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid form field '{}': {}", name, e)))
}
