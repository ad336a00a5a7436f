use chrono::{Duration, Utc};
use clap::Subcommand;
use serde::Deserialize;
use serde_json::json;
use std::io::BufRead;

use crate::cli::client::ApiClient;
use crate::cli::config::{clear_auth, load_server, save_auth, AuthInfo};
use crate::cli::utils::{output_json, output_success};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum AuthCommands {
    #[command(about = "Login to the configured server")]
    Login {
        #[arg(help = "Username")]
        username: String,
        #[arg(long, help = "Password (read from MODCTL_PASSWORD or stdin if not provided)")]
        password: Option<String>,
    },

    #[command(about = "Forget the stored token")]
    Logout,

    #[command(about = "Show the operator behind the stored token")]
    Whoami,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
    username: String,
    scopes: Vec<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct WhoAmI {
    username: String,
    scopes: Vec<String>,
}

pub async fn handle(cmd: AuthCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AuthCommands::Login { username, password } => {
            let server =
                load_server()?.ok_or_else(|| anyhow::anyhow!("No server configured. Run `modctl server set <url>`"))?;
            let password = match password.or_else(|| std::env::var("MODCTL_PASSWORD").ok()) {
                Some(password) => password,
                None => read_password()?,
            };

            let client = ApiClient::new(&server.url, None);
            let login: LoginData = client
                .post_json("/auth/login", &json!({ "username": username, "password": password }))
                .await?;

            save_auth(&AuthInfo {
                server: server.url.clone(),
                username: login.username.clone(),
                token: login.token,
                scopes: login.scopes.clone(),
                expires_at: Utc::now() + Duration::seconds(login.expires_in),
            })?;

            output_success(
                &output_format,
                &format!("Logged in to {} as {}", server.url, login.username),
                Some(json!({ "username": login.username, "scopes": login.scopes })),
            )
        }
        AuthCommands::Logout => {
            let message = if clear_auth()? {
                "Logged out"
            } else {
                "Not logged in"
            };
            output_success(&output_format, message, None)
        }
        AuthCommands::Whoami => {
            let client = ApiClient::from_config()?;
            let me: WhoAmI = client.get("/api/auth/whoami").await?;
            match output_format {
                OutputFormat::Json => output_json(&me),
                OutputFormat::Text => {
                    println!("{} ({})", me.username, me.scopes.join(", "));
                    Ok(())
                }
            }
        }
    }
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("password is required");
    }
    Ok(password)
}
