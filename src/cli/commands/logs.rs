use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;

use crate::cli::client::ApiClient;
use crate::cli::utils::output_json;
use crate::cli::OutputFormat;
use crate::logs::ErrorLogEntry;

#[derive(Subcommand)]
pub enum LogsCommands {
    #[command(about = "Query the server error log, newest first")]
    Errors {
        #[arg(long, help = "Error code, e.g. NOT_FOUND")]
        code: Option<String>,
        #[arg(long, help = "Operator that triggered the error")]
        user: Option<String>,
        #[arg(long, help = "RFC 3339 lower bound")]
        since: Option<DateTime<Utc>>,
        #[arg(long, help = "RFC 3339 upper bound")]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
}

#[derive(Debug, Default, Serialize)]
struct ErrorFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<u32>,
}

pub async fn handle(cmd: LogsCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::from_config()?;

    match cmd {
        LogsCommands::Errors {
            code,
            user,
            since,
            until,
            limit,
            offset,
        } => {
            let filter = ErrorFilter {
                code,
                user,
                since,
                until,
                limit,
                offset,
            };
            let entries: Vec<ErrorLogEntry> = client.get_query("/api/logs/errors", &filter).await?;

            match output_format {
                OutputFormat::Json => output_json(&entries),
                OutputFormat::Text => {
                    if entries.is_empty() {
                        println!("No errors recorded");
                    }
                    for entry in &entries {
                        println!(
                            "{}  {:<20} {:<12} {}",
                            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                            entry.code,
                            entry.user.as_deref().unwrap_or("-"),
                            entry.message
                        );
                        if let Some(url) = &entry.url {
                            println!("    {}", url);
                        }
                    }
                    Ok(())
                }
            }
        }
    }
}
