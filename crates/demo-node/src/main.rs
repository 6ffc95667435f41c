//! `lu-demo-node`: reference node for Lumina.
//!
//! Connects to the controller, registers a handful of commands, and emits
//! `started` once and `button{n}` on demand (or on a timer).
//!
//! # Env vars
//!
//! | Variable              | Description                                  | Default          |
//! |-----------------------|----------------------------------------------|------------------|
//! | `LUMINA_SERVER`       | Controller node port, `host:port`            | `localhost:5326` |
//! | `LUMINA_NODE_NAME`    | Node name (namespace of commands and events) | `demo`           |
//! | `LUMINA_NODE_TOKEN`   | Shared registration token                    | (none)           |
//! | `LUMINA_BUTTON_SECS`  | Emit `button{n}` every N seconds, `0` = off  | `0`              |
//!
//! # Commands
//!
//! - `ping`: `"pong"`
//! - `echo{...}`: its arguments
//! - `fail{reason}`: always fails
//! - `slow{ms}`: sleeps, then returns `ms`
//! - `press{n}`: emits `button{n}`
//! - `set_status{state,reason}`: changes the reported node health

mod commands;

use std::time::Duration;

use lu_node_sdk::{CommandRegistry, NodeClientBuilder, NodeHandle, State};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = std::env::var("LUMINA_SERVER").unwrap_or_else(|_| "localhost:5326".into());
    let name = std::env::var("LUMINA_NODE_NAME").unwrap_or_else(|_| "demo".into());
    let button_secs: u64 = std::env::var("LUMINA_BUTTON_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    // ── Build node client ────────────────────────────────────────────
    let client = NodeClientBuilder::new()
        .server(&server)
        .name(&name)
        .module(env!("CARGO_PKG_NAME"))
        .token_from_env("LUMINA_NODE_TOKEN")
        .build()?;
    let handle = client.handle();

    // ── Build command registry ───────────────────────────────────────
    let mut reg = CommandRegistry::new();
    reg.register("ping", commands::Ping)
        .register("echo", commands::Echo)
        .register("fail", commands::Fail)
        .register("slow", commands::Slow)
        .register("press", commands::Press { handle: handle.clone() })
        .register("set_status", commands::SetStatus { handle: handle.clone() })
        .declare_event("started")
        .declare_event("button");

    tracing::info!(
        commands = ?reg.command_names(),
        events = ?reg.event_names(),
        "registered commands"
    );

    // ── Run ──────────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();

    // Listen for Ctrl-C.
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl-C received, shutting down");
        shutdown_clone.cancel();
    });

    // Queued until the first registration succeeds.
    handle.send_event("started", vec![]);
    handle.set_status(State::Green, Some("Demo ready"));
    if button_secs > 0 {
        spawn_button_timer(handle.clone(), Duration::from_secs(button_secs), shutdown.clone());
    }

    tracing::info!(server = %server, node = %name, "starting lu-demo-node");

    match client.run(reg, shutdown).await {
        Ok(()) => tracing::info!("node exited cleanly"),
        Err(lu_node_sdk::NodeSdkError::Shutdown) => tracing::info!("node shutdown"),
        Err(e) => {
            tracing::error!(error = %e, "node exited with error");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Emit `button{1}`, `button{2}`, ... every `every`.
fn spawn_button_timer(handle: NodeHandle, every: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        let mut n: u64 = 0;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            n = n % 4 + 1;
            handle.send_event("button", vec![json!(n)]);
        }
    });
}
