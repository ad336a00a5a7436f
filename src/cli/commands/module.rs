use clap::{Args, Subcommand};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use crate::cli::client::{segment, ApiClient};
use crate::cli::utils::{output_json, output_success, print_history, print_module, print_modules, print_versions};
use crate::cli::OutputFormat;
use crate::registry::{
    parse_tags, HistoryEntry, Module, ModuleFilter, ModuleSource, SourceInput, UploadedFile, Version,
};
use crate::types::ModuleEnv;

#[derive(Subcommand)]
pub enum ModuleCommands {
    #[command(about = "List registered modules")]
    List {
        #[arg(long, help = "Only modules with this execution environment")]
        env: Option<String>,
        #[arg(long, help = "Only modules carrying this tag")]
        tag: Option<String>,
    },

    #[command(about = "Show one module with its versions")]
    Show {
        #[arg(help = "Module name")]
        name: String,
    },

    #[command(about = "Register a new module with its first version")]
    Register {
        #[arg(help = "Module name")]
        name: String,
        #[arg(long, help = "Execution environment: venv, conda, docker, inline or git")]
        env: String,
        #[arg(long, help = "Label of the first version (server default when omitted)")]
        version: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, help = "Comma separated tags")]
        tags: Option<String>,
        #[command(flatten)]
        source: SourceArgs,
    },

    #[command(about = "Upload a new version of a module")]
    Upload {
        #[arg(help = "Module name")]
        name: String,
        #[arg(help = "Version label")]
        version: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, help = "Comma separated tags")]
        tags: Option<String>,
        #[command(flatten)]
        source: SourceArgs,
    },

    #[command(about = "List versions of a module")]
    Versions {
        #[arg(help = "Module name")]
        name: String,
    },

    #[command(about = "Make a version the active one")]
    Activate {
        name: String,
        version: String,
    },

    #[command(about = "Deactivate the active version")]
    Deactivate {
        name: String,
        version: String,
    },

    #[command(about = "Switch back to an earlier version")]
    Rollback {
        name: String,
        version: String,
    },

    #[command(about = "Start the active version on the runner")]
    Deploy {
        name: String,
    },

    #[command(about = "Stop the running deployment")]
    Undeploy {
        name: String,
    },

    #[command(about = "Change module description or tags")]
    Update {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, help = "Comma separated tags; an empty string clears them")]
        tags: Option<String>,
    },

    #[command(about = "Remove a module that is not deployed")]
    Delete {
        name: String,
    },

    #[command(about = "Show the lifecycle history of a module")]
    History {
        name: String,
    },
}

/// Exactly one of these must be given
#[derive(Args, Debug, Default)]
pub struct SourceArgs {
    #[arg(long, help = "Zip archive with the module code")]
    pub file: Option<PathBuf>,
    #[arg(long, help = "Git repository URI")]
    pub git_uri: Option<String>,
    #[arg(long, help = "Inline code, or @path to read it from a file")]
    pub code: Option<String>,
    #[arg(long, help = "JSON input schema for inline code, or @path")]
    pub input_schema: Option<String>,
}

impl SourceArgs {
    fn read(self) -> anyhow::Result<SourceInput> {
        let file = match self.file {
            Some(path) => Some(UploadedFile {
                filename: file_name(&path)?,
                bytes: std::fs::read(&path)
                    .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?,
            }),
            None => None,
        };

        Ok(SourceInput {
            file,
            git_uri: self.git_uri,
            code: self.code.map(|c| read_at_path(&c)).transpose()?,
            input_schema: self.input_schema.map(|s| read_at_path(&s)).transpose()?,
        })
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("{} is not a file path", path.display()))
}

fn read_at_path(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("cannot read {}: {}", path, e)),
        None => Ok(value.to_string()),
    }
}

/// Validates the source locally, then appends it to the multipart form.
fn attach_source(form: Form, source: SourceArgs) -> anyhow::Result<Form> {
    let source = ModuleSource::try_from(source.read()?)?;
    let form = match source {
        ModuleSource::File { filename, bytes } => {
            let part = Part::bytes(bytes).file_name(filename).mime_str("application/zip")?;
            form.part("file", part)
        }
        ModuleSource::GitUri(uri) => form.text("git_uri", uri),
        ModuleSource::InlineCode { code, input_schema } => form
            .text("code", code)
            .text("input_schema", input_schema.to_string()),
    };
    Ok(form)
}

fn with_optional(form: Form, key: &'static str, value: Option<String>) -> Form {
    match value {
        Some(value) => form.text(key, value),
        None => form,
    }
}

fn module_path(name: &str) -> String {
    format!("/api/modules/{}", segment(name))
}

pub async fn handle(cmd: ModuleCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::from_config()?;

    match cmd {
        ModuleCommands::List { env, tag } => {
            let filter = ModuleFilter {
                env: env
                    .map(|e| e.parse::<ModuleEnv>())
                    .transpose()
                    .map_err(|e| anyhow::anyhow!(e))?,
                tag,
            };
            let modules: Vec<Module> = client.get_query("/api/modules", &filter).await?;
            match output_format {
                OutputFormat::Json => output_json(&modules),
                OutputFormat::Text => {
                    print_modules(&modules);
                    Ok(())
                }
            }
        }
        ModuleCommands::Show { name } => {
            let module: Module = client.get(&module_path(&name)).await?;
            show_module(&output_format, &module)
        }
        ModuleCommands::Register {
            name,
            env,
            version,
            description,
            tags,
            source,
        } => {
            let env: ModuleEnv = env.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let form = Form::new().text("name", name).text("env", env.to_string());
            let form = with_optional(form, "version", version);
            let form = with_optional(form, "description", description);
            let form = with_optional(form, "tags", tags);
            let form = attach_source(form, source)?;

            let module: Module = client.post_multipart("/api/modules", form).await?;
            output_success(
                &output_format,
                &format!(
                    "Registered {} ({}) with inactive version {}",
                    module.name,
                    module.env,
                    module.versions.first().map(|v| v.label.as_str()).unwrap_or("-")
                ),
                Some(json!({ "module": module })),
            )
        }
        ModuleCommands::Upload {
            name,
            version,
            description,
            tags,
            source,
        } => {
            let form = Form::new().text("version", version);
            let form = with_optional(form, "description", description);
            let form = with_optional(form, "tags", tags);
            let form = attach_source(form, source)?;

            let module: Module = client
                .post_multipart(&format!("{}/versions", module_path(&name)), form)
                .await?;
            let label = module.versions.last().map(|v| v.label.as_str()).unwrap_or("-");
            output_success(
                &output_format,
                &format!("Uploaded {}@{}", module.name, label),
                Some(json!({ "module": module })),
            )
        }
        ModuleCommands::Versions { name } => {
            let versions: Vec<Version> = client.get(&format!("{}/versions", module_path(&name))).await?;
            match output_format {
                OutputFormat::Json => output_json(&versions),
                OutputFormat::Text => {
                    print_versions(&versions);
                    Ok(())
                }
            }
        }
        ModuleCommands::Activate { name, version } => {
            let module = lifecycle(&client, &name, "activate", &version).await?;
            output_success(
                &output_format,
                &format!("{}@{} is now active", name, version),
                Some(json!({ "module": module })),
            )
        }
        ModuleCommands::Deactivate { name, version } => {
            let module = lifecycle(&client, &name, "deactivate", &version).await?;
            output_success(
                &output_format,
                &format!("{}@{} deactivated", name, version),
                Some(json!({ "module": module })),
            )
        }
        ModuleCommands::Rollback { name, version } => {
            let module = lifecycle(&client, &name, "rollback", &version).await?;
            output_success(
                &output_format,
                &format!("{} rolled back to {}", name, version),
                Some(json!({ "module": module })),
            )
        }
        ModuleCommands::Deploy { name } => {
            let module: Module = client.post_empty(&format!("{}/deploy", module_path(&name))).await?;
            output_success(
                &output_format,
                &format!(
                    "Deployed {}@{}",
                    module.name,
                    module.deployed_version.as_deref().unwrap_or("-")
                ),
                Some(json!({ "module": module })),
            )
        }
        ModuleCommands::Undeploy { name } => {
            let module: Module = client.delete(&format!("{}/deploy", module_path(&name))).await?;
            output_success(
                &output_format,
                &format!("Stopped {}", module.name),
                Some(json!({ "module": module })),
            )
        }
        ModuleCommands::Update {
            name,
            description,
            tags,
        } => {
            let mut patch = Map::new();
            if let Some(description) = description {
                patch.insert("description".to_string(), Value::String(description));
            }
            if let Some(tags) = tags {
                patch.insert("tags".to_string(), json!(parse_tags(&tags)));
            }
            if patch.is_empty() {
                anyhow::bail!("nothing to update; pass --description and/or --tags");
            }

            let module: Module = client.patch_json(&module_path(&name), &Value::Object(patch)).await?;
            output_success(
                &output_format,
                &format!("Updated {}", module.name),
                Some(json!({ "module": module })),
            )
        }
        ModuleCommands::Delete { name } => {
            let module: Module = client.delete(&module_path(&name)).await?;
            output_success(
                &output_format,
                &format!("Deleted {} ({} versions)", module.name, module.versions.len()),
                None,
            )
        }
        ModuleCommands::History { name } => {
            let entries: Vec<HistoryEntry> = client.get(&format!("{}/history", module_path(&name))).await?;
            match output_format {
                OutputFormat::Json => output_json(&entries),
                OutputFormat::Text => {
                    print_history(&entries);
                    Ok(())
                }
            }
        }
    }
}

async fn lifecycle(client: &ApiClient, name: &str, action: &str, version: &str) -> anyhow::Result<Module> {
    client
        .post_json(
            &format!("{}/{}", module_path(name), action),
            &json!({ "version": version }),
        )
        .await
}

fn show_module(output_format: &OutputFormat, module: &Module) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => output_json(module),
        OutputFormat::Text => {
            print_module(module);
            Ok(())
        }
    }
}
