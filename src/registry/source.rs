use serde_json::Value;

use super::error::{RegistryError, RegistryResult};
use crate::types::ModuleEnv;

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";
const GIT_SCHEMES: [&str; 5] = ["https", "http", "ssh", "git", "file"];

/// Code payload of a module version. Exactly one kind per upload.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleSource {
    File { filename: String, bytes: Vec<u8> },
    GitUri(String),
    InlineCode { code: String, input_schema: Value },
}

#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Raw, unvalidated source fields as they arrive from a form or CLI.
/// Blank strings count as absent.
#[derive(Debug, Clone, Default)]
pub struct SourceInput {
    pub file: Option<UploadedFile>,
    pub git_uri: Option<String>,
    pub code: Option<String>,
    pub input_schema: Option<String>,
}

impl ModuleSource {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ModuleSource::File { .. } => "zip",
            ModuleSource::GitUri(_) => "git",
            ModuleSource::InlineCode { .. } => "inline",
        }
    }

    /// Reject source kinds that the module's environment cannot run.
    pub fn ensure_compatible(&self, env: ModuleEnv) -> RegistryResult<()> {
        let ok = match (env, self) {
            (ModuleEnv::Inline, ModuleSource::InlineCode { .. }) => true,
            (ModuleEnv::Inline, _) => false,
            (_, ModuleSource::InlineCode { .. }) => false,
            (ModuleEnv::Git, ModuleSource::GitUri(_)) => true,
            (ModuleEnv::Git, _) => false,
            (ModuleEnv::Venv | ModuleEnv::Conda | ModuleEnv::Docker, _) => true,
        };

        if ok {
            Ok(())
        } else {
            Err(RegistryError::InvalidSource(format!(
                "{} source cannot be used with env '{}'",
                self.kind_name(),
                env
            )))
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl TryFrom<SourceInput> for ModuleSource {
    type Error = RegistryError;

    fn try_from(input: SourceInput) -> Result<Self, Self::Error> {
        let git_uri = present(input.git_uri);
        let code = present(input.code);
        let input_schema = present(input.input_schema);

        let mut supplied = Vec::new();
        if input.file.is_some() {
            supplied.push("file");
        }
        if git_uri.is_some() {
            supplied.push("git_uri");
        }
        if code.is_some() || input_schema.is_some() {
            supplied.push("inline code");
        }

        match supplied.len() {
            0 => {
                return Err(RegistryError::InvalidSource(
                    "no source supplied; provide a zip file, a git URI or inline code".to_string(),
                ))
            }
            1 => {}
            _ => {
                return Err(RegistryError::InvalidSource(format!(
                    "exactly one source kind must be supplied, got {}",
                    supplied.join(", ")
                )))
            }
        }

        if let Some(file) = input.file {
            return validate_zip(file);
        }
        if let Some(uri) = git_uri {
            return validate_git_uri(uri.trim());
        }
        validate_inline(code, input_schema)
    }
}

fn validate_zip(file: UploadedFile) -> RegistryResult<ModuleSource> {
    if file.filename.trim().is_empty() {
        return Err(RegistryError::InvalidSource("uploaded file has no name".to_string()));
    }
    if file.bytes.is_empty() {
        return Err(RegistryError::InvalidSource(format!("'{}' is empty", file.filename)));
    }
    if !(file.bytes.starts_with(ZIP_LOCAL_HEADER) || file.bytes.starts_with(ZIP_EMPTY_ARCHIVE)) {
        return Err(RegistryError::InvalidSource(format!(
            "'{}' is not a zip archive",
            file.filename
        )));
    }
    Ok(ModuleSource::File {
        filename: file.filename,
        bytes: file.bytes,
    })
}

fn validate_git_uri(uri: &str) -> RegistryResult<ModuleSource> {
    if let Ok(parsed) = url::Url::parse(uri) {
        if GIT_SCHEMES.contains(&parsed.scheme()) && (parsed.has_host() || parsed.scheme() == "file") {
            return Ok(ModuleSource::GitUri(uri.to_string()));
        }
        return Err(RegistryError::InvalidSource(format!(
            "unsupported git URI scheme '{}'",
            parsed.scheme()
        )));
    }

    // scp-like syntax: user@host:path/to/repo.git
    if let Some((user_host, path)) = uri.split_once(':') {
        if let Some((user, host)) = user_host.split_once('@') {
            let valid = !user.is_empty()
                && !host.is_empty()
                && !path.is_empty()
                && !uri.contains(char::is_whitespace);
            if valid {
                return Ok(ModuleSource::GitUri(uri.to_string()));
            }
        }
    }

    Err(RegistryError::InvalidSource(format!("'{}' is not a git URI", uri)))
}

fn validate_inline(code: Option<String>, input_schema: Option<String>) -> RegistryResult<ModuleSource> {
    let code = code.ok_or_else(|| {
        RegistryError::InvalidSource("inline source requires code".to_string())
    })?;
    let raw_schema = input_schema.ok_or_else(|| {
        RegistryError::InvalidSource("inline source requires an input schema".to_string())
    })?;

    let input_schema: Value = serde_json::from_str(&raw_schema)
        .map_err(|e| RegistryError::InvalidSource(format!("input schema is not valid JSON: {}", e)))?;
    if !input_schema.is_object() {
        return Err(RegistryError::InvalidSource(
            "input schema must be a JSON object".to_string(),
        ));
    }

    Ok(ModuleSource::InlineCode { code, input_schema })
}

/// Module names: 2-100 characters of letters, digits, hyphen and underscore
pub fn validate_module_name(name: &str) -> RegistryResult<()> {
    if name.len() < 2 || name.len() > 100 {
        return Err(RegistryError::InvalidInput(
            "module name must be between 2 and 100 characters".to_string(),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(RegistryError::InvalidInput(
            "module name can only contain letters, numbers, hyphens, and underscores".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_version_label(label: &str) -> RegistryResult<()> {
    if label.is_empty() || label.len() > 64 {
        return Err(RegistryError::InvalidInput(
            "version label must be between 1 and 64 characters".to_string(),
        ));
    }
    if label.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(RegistryError::InvalidInput(format!(
            "version label '{}' may not contain whitespace or '/'",
            label
        )));
    }
    Ok(())
}
