//! `wsrelay health` — check the health of a running instance.
//!
//! Sends a `GET /health` request to the specified URL and displays
//! the response as formatted text or raw JSON.

use hyper::Method;

use super::client;
use crate::cli::HealthArgs;
use crate::error::RelayError;
use crate::health::HealthResponse;

pub async fn execute(args: HealthArgs) -> Result<(), RelayError> {
    let reply = client::send(Method::GET, &client::endpoint(&args.url, "/health"), &[]).await?;

    if !reply.status.is_success() {
        return Err(RelayError::HealthCheckFailed(reply.status));
    }

    if args.json {
        println!("{}", reply.text());
        return Ok(());
    }

    match serde_json::from_slice::<HealthResponse>(&reply.body) {
        Ok(health) => print_summary(&args.url, &health),
        Err(e) => {
            eprintln!("Failed to parse health response: {e}");
            println!("{}", reply.text());
        }
    }

    Ok(())
}

fn print_summary(url: &str, health: &HealthResponse) {
    let mark = if health.status == "healthy" { "\u{2713}" } else { "!" };
    println!("{mark} wsrelay is {} ({url})", health.status);
    println!(
        "  version:        {} ({}, {})",
        health.version, health.build.git_sha, health.build.profile
    );
    println!("  uptime:         {}", format_uptime(health.uptime_seconds));
    println!(
        "  config:         {} {} (loaded {}s ago), mode {}",
        health.config.source,
        health.config.version,
        health.config.loaded_ago_seconds,
        health.config.streaming_mode
    );
    println!(
        "  upstream:       {} connections, {} pending requests",
        health.upstream.connections, health.upstream.pending_requests
    );
    let current = health
        .rotation
        .state
        .current_auth_index
        .map_or_else(|| "none".to_string(), |i| i.to_string());
    println!(
        "  account:        {current} of {:?}, {} failures{}",
        health.rotation.accounts,
        health.rotation.state.failure_count,
        if health.rotation.state.full_cycle_failure {
            ", breaker open"
        } else {
            ""
        }
    );
    println!(
        "  requests:       {} calls, {} cache hits, {} failed",
        health.stats.total_calls, health.stats.cache_hits, health.stats.failed
    );
}

fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
