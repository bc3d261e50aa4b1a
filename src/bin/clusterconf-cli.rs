use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::path::PathBuf;

use clusterconf::config::loader::load_config;

#[derive(Parser)]
#[command(name = "clusterconf-cli")]
#[command(about = "Management CLI for a clusterconf node", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "CLUSTERCONF_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active configuration with secrets masked
    Get,
    /// Show the full client configuration
    Client,
    /// Show the configuration served to anonymous clients
    Limited,
    /// Show the signed client configuration hash
    Assertion,
    /// Re-read the configuration from disk and environment
    Reload,
    /// List settings overridden by environment variables
    Env,
    /// Validate a TOML file locally, then install it cluster-wide
    Save {
        /// Path to the configuration file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = format!("{}/api/v1/config", cli.url.trim_end_matches('/'));

    let request = match cli.command {
        Commands::Get => client.get(&base),
        Commands::Client => client.get(format!("{}/client", base)),
        Commands::Limited => client.get(format!("{}/client/limited", base)),
        Commands::Assertion => client.get(format!("{}/client/assertion", base)),
        Commands::Reload => client.post(format!("{}/reload", base)),
        Commands::Env => client.get(format!("{}/environment", base)),
        Commands::Save { file } => {
            let config = load_config(&file)?;
            client.put(&base).json(&config)
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
