//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;

use anyhow::Context;
use lu_domain::config::{Config, ConfigSeverity};

use crate::responder::Responder;
use crate::server::Server;
use crate::state::AppState;

/// Validate config, load the responder rules and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Responder ────────────────────────────────────────────────────
    let responder = Arc::new(Responder::new(&config.responder));

    // ── Server ───────────────────────────────────────────────────────
    let server = Arc::new(
        Server::new(config.clone(), responder).context("registering responder aliases")?,
    );
    tracing::info!(
        hostname = %server.hostname(),
        commands = server.command_names().len(),
        expected_nodes = config.server.nodes.len(),
        "server ready"
    );

    Ok(AppState {
        config,
        server,
        shutdown: tokio_util::sync::CancellationToken::new(),
    })
}

/// Start the loops that live as long as the process.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Aggregate node status ────────────────────────────────────────
    state
        .server
        .spawn_status_watcher(state.shutdown.child_token());

    // ── Periodic health log ──────────────────────────────────────────
    {
        let server = state.server.clone();
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.cancelled() => break,
                }
                let (status, _) = server.status();
                let (node_status, why) = server.node_status();
                tracing::info!(
                    status = %status,
                    node_status = %node_status,
                    reason = why.as_deref().unwrap_or(""),
                    connected = server.nodes().connected(),
                    known = server.nodes().len(),
                    "health"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lu_domain::config::ActionSpec;

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.responder.max_depth = 0;
        let err = build_app_state(Arc::new(config)).err().unwrap();
        assert!(err.to_string().contains("1 error(s)"));
    }

    #[test]
    fn responder_groups_become_commands() {
        let mut config = Config::default();
        config
            .responder
            .groups
            .insert("movie".into(), vec!["_name".into()]);
        config.responder.actions.insert(
            "remote/off".into(),
            ActionSpec::List(vec!["_name".into()]),
        );
        let state = build_app_state(Arc::new(config)).unwrap();
        let names = state.server.command_names();
        assert!(names.contains(&"movie".to_string()));
        assert!(names.contains(&"__remote/off".to_string()));
    }
}
