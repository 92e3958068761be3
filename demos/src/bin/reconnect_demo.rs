//! Reconnect Demo
//!
//! Showcases: exponential backoff, the retry ceiling, message queueing
//! while no connection is up
//!
//! Run: cargo run --bin reconnect_demo -- [url]
//!
//! Without an argument the demo points at a local port nothing listens on,
//! so every attempt fails and the client eventually gives up.

use colored::*;
use dawn_ws::{CallbackStrategy, ReconnectPolicy, WebSocketClient, WebSocketConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

const UNREACHABLE_URL: &str = "ws://127.0.0.1:9";

fn timestamp() -> String {
    format!("[{}]", chrono::Local::now().format("%H:%M:%S%.3f"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| UNREACHABLE_URL.to_string());

    let policy = ReconnectPolicy::new()
        .with_retry_interval(Duration::from_millis(100))
        .with_max_retries(5)
        .with_backoff_multiplier(2.0)
        .with_max_delay(Duration::from_secs(1));

    println!("{}", "═".repeat(65).cyan());
    println!("{}", "  AUTO-RECONNECT DEMO".cyan().bold());
    println!("{}", "  dawn-ws - Resilient Connection Handling".cyan());
    println!("{}", "═".repeat(65).cyan());
    println!();

    println!("{}", "  RECONNECTION CONFIGURATION".white().bold());
    println!("  {}", "─".repeat(50));
    println!("  Retry Interval:     {} ms", policy.retry_interval.as_millis().to_string().cyan());
    println!("  Max Delay:          {} ms", "1000".cyan());
    println!("  Backoff Multiplier: {}", format!("{}x", policy.backoff_multiplier).cyan());
    println!("  Max Retries:        {}", policy.max_retries.to_string().cyan());
    println!();

    println!("{}", "  EXPONENTIAL BACKOFF PROGRESSION".white().bold());
    println!("  {}", "─".repeat(50));
    for retry_count in 0..policy.max_retries {
        let delay = policy.delay_for_attempt(retry_count).as_millis() as u64;
        let bar_len = (delay / 25).min(40) as usize;
        println!(
            "  Attempt {:>2}: {:>6} ms  {}",
            retry_count + 1,
            delay,
            "█".repeat(bar_len).yellow()
        );
    }
    println!();

    println!("{}", "  LIVE CONNECTION TEST".white().bold());
    println!("  {}", "─".repeat(50));
    println!("  Target: {}", url.white());

    let done = Arc::new(Notify::new());
    let strategy = CallbackStrategy::new()
        .on_open(|_, _| {
            println!("  {} {} {}", timestamp().dimmed(), "●".green(), "Connected".green());
        })
        .on_message(|_, text| {
            println!("  {} {} {}", timestamp().dimmed(), "←".blue(), text);
        })
        .on_failure(|client, error| {
            println!(
                "  {} {} {} (retry count {})",
                timestamp().dimmed(),
                "✗".red(),
                error,
                client.state().retry_count
            );
        })
        .on_reconnect_scheduled(|attempt, delay| {
            println!(
                "  {} {} Attempt {} scheduled in {:?}",
                timestamp().dimmed(),
                "↻".yellow(),
                attempt,
                delay
            );
        })
        .on_retries_exhausted({
            let done = Arc::clone(&done);
            move |retries| {
                println!(
                    "  {} {} Retries exhausted after {}",
                    timestamp().dimmed(),
                    "✗".red().bold(),
                    retries
                );
                done.notify_one();
            }
        });

    let client = WebSocketClient::builder(url)
        .with_config(WebSocketConfig::new().with_retry(policy))
        .with_strategy(strategy)
        .connect()?;

    // Queued until a connection comes up
    client.send("hello from the queue").await?;

    tokio::select! {
        _ = done.notified() => {}
        _ = tokio::time::sleep(Duration::from_secs(15)) => {
            println!("  {} Still connected after 15s", "Note:".dimmed());
        }
    }

    client.close().await;
    println!();
    println!("  {} Client closed, no further attempts will be made", "Note:".dimmed());

    Ok(())
}
