use clap::Subcommand;
use serde_json::{json, Value};

use crate::cli::config::{load_server, ping_server, save_server, ServerInfo, ServerStatus};
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum ServerCommands {
    #[command(about = "Point the CLI at a console server")]
    Set {
        #[arg(help = "Server URL, e.g. http://localhost:8000")]
        url: String,
    },

    #[command(about = "Show the configured server and its health")]
    Show,
}

pub async fn handle(cmd: ServerCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ServerCommands::Set { url } => {
            let mut server = ServerInfo::new(&url)?;
            let status = ping_server(&server).await;
            server.update_ping(status);
            save_server(&server)?;

            if status == ServerStatus::Down {
                tracing::warn!(url = %server.url, "Server did not answer the health check");
            }
            output_success(
                &output_format,
                &format!("Server set to {} ({})", server.url, status_label(status)),
                Some(json!({ "server": server })),
            )
        }
        ServerCommands::Show => {
            let mut server =
                load_server()?.ok_or_else(|| anyhow::anyhow!("No server configured. Run `modctl server set <url>`"))?;
            let status = ping_server(&server).await;
            server.update_ping(status);
            save_server(&server)?;

            match output_format {
                OutputFormat::Json => crate::cli::utils::output_json(&json!({ "server": server })),
                OutputFormat::Text => {
                    println!("Server: {}", server.url);
                    println!("Status: {}", status_label(status));
                    println!("Added:  {}", server.added_at.to_rfc3339());
                    if status == ServerStatus::Up {
                        if let Ok(info) = fetch_info(&server.url).await {
                            if let Some(version) = info.pointer("/data/version").and_then(Value::as_str) {
                                println!("Version: {}", version);
                            }
                        }
                    }
                    Ok(())
                }
            }
        }
    }
}

fn status_label(status: ServerStatus) -> &'static str {
    match status {
        ServerStatus::Up => "up",
        ServerStatus::Down => "down",
        ServerStatus::Unknown => "unknown",
    }
}

async fn fetch_info(url: &str) -> anyhow::Result<Value> {
    Ok(reqwest::get(format!("{}/", url)).await?.json().await?)
}
