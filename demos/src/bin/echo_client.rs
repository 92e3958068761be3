//! Echo Client
//!
//! Connects to an echo endpoint, sends every stdin line and prints what
//! comes back. Lines typed during an outage are queued and go out after
//! the reconnect.
//!
//! Run: cargo run --bin echo_client -- [url]
//!
//! Set `DAWN_WS_CONFIG` to a JSON file to override the default timeouts and
//! retry policy, and `RUST_LOG=dawn_ws=debug` to watch the client work.

use colored::*;
use dawn_ws::{CallbackStrategy, WebSocketClient, WebSocketConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "wss://echo.websocket.org";

fn timestamp() -> String {
    format!("[{}]", chrono::Local::now().format("%H:%M:%S%.3f"))
}

async fn load_config() -> Result<WebSocketConfig, Box<dyn std::error::Error>> {
    match std::env::var("DAWN_WS_CONFIG") {
        Ok(path) => {
            let json = tokio::fs::read_to_string(&path).await?;
            Ok(WebSocketConfig::from_json(&json)?)
        }
        Err(_) => Ok(WebSocketConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_URL.to_string());
    let config = load_config().await?;

    println!("{}", "═".repeat(65).cyan());
    println!("{}", "  ECHO CLIENT".cyan().bold());
    println!("  {}", url.white());
    println!("{}", "═".repeat(65).cyan());
    println!();

    let strategy = CallbackStrategy::new()
        .on_open(|_, response| {
            println!(
                "  {} {} Connected (HTTP {})",
                timestamp().dimmed(),
                "●".green(),
                response.status
            );
        })
        .on_message(|_, text| {
            println!("  {} {} {}", timestamp().dimmed(), "←".blue(), text);
        })
        .on_binary(|_, bytes| {
            println!(
                "  {} {} {} binary bytes",
                timestamp().dimmed(),
                "←".blue(),
                bytes.len()
            );
        })
        .on_closing(|_, code, reason| {
            println!(
                "  {} {} Server closed ({} {})",
                timestamp().dimmed(),
                "●".yellow(),
                code,
                reason
            );
        })
        .on_failure(|_, error| {
            println!("  {} {} {}", timestamp().dimmed(), "✗".red(), error);
        })
        .on_reconnect_scheduled(|attempt, delay| {
            println!(
                "  {} {} Reconnect attempt {} in {:?}",
                timestamp().dimmed(),
                "↻".yellow(),
                attempt,
                delay
            );
        })
        .on_retries_exhausted(|retries| {
            println!(
                "  {} {} Giving up after {} retries",
                timestamp().dimmed(),
                "✗".red().bold(),
                retries
            );
        });

    let client = WebSocketClient::builder(url)
        .with_config(config)
        .with_strategy(strategy)
        .connect()?;

    println!("  {} Type a line to send it, Ctrl-D to quit", "Note:".dimmed());
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        client.send(line).await?;
    }

    client.close().await;
    println!();
    println!("  {} Closed", "●".dimmed());

    Ok(())
}
