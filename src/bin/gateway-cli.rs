use std::time::{SystemTime, UNIX_EPOCH};

use bavel_gateway::security::auth::compute_signature;
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the Bavel security gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "BAVEL_ADMIN_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway and counter store status
    Status,
    /// List configured API keys (masked)
    Keys,
    /// Show rate-limit and flood thresholds
    Limits,
    /// Inspect one rate-limit window
    Window {
        /// ip, apiKey or global
        scope: String,
        identifier: String,
    },
    /// Sign a JSON payload offline and print the request headers
    Sign {
        /// Shared HMAC secret
        #[arg(long, env = "BAVEL_HMAC_SECRET")]
        secret: String,
        /// JSON body to sign
        payload: String,
        /// Unix seconds; defaults to now
        #[arg(long)]
        timestamp: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let path = match &cli.command {
        Commands::Status => "/admin/status".to_string(),
        Commands::Keys => "/admin/keys".to_string(),
        Commands::Limits => "/admin/limits".to_string(),
        Commands::Window { scope, identifier } => {
            format!("/admin/rate-limit/{scope}/{identifier}")
        }
        Commands::Sign {
            secret,
            payload,
            timestamp,
        } => return sign(secret, payload, *timestamp),
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = reqwest::Client::new()
        .get(format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

fn sign(secret: &str, payload: &str, timestamp: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let body: Value = serde_json::from_str(payload)?;
    let timestamp = match timestamp {
        Some(ts) => ts,
        None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs(),
    }
    .to_string();
    let signature = compute_signature(secret.as_bytes(), &timestamp, &body)?;

    println!("X-Bavel-Timestamp: {timestamp}");
    println!("X-Bavel-Signature: {signature}");
    println!("{}", serde_json::to_string(&body)?);
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
