//! Text shell for humans on a node connection.
//!
//! A connection switches into shell mode with a line starting with `***`.
//! From then on every line is a shell request:
//!
//! | Input            | Effect                                      |
//! |------------------|---------------------------------------------|
//! | `@name{a,b}`     | run a command (aliases expanded)            |
//! | `*name{a,b}`     | inject an event into the rule engine        |
//! | `ls events`      | list registered events                      |
//! | `ls commands`    | list registered commands                    |
//! | `ls nodes`       | list known nodes with their status          |
//! | `help`           | this table                                  |
//! | `exit`           | close the connection                        |
//!
//! Every request ends with exactly one `SUCCESS: <echo>` or
//! `FAILED: <echo>` line, possibly preceded by listing lines.

use lu_domain::CommandResult;
use lu_protocol::{Message, MessageKind};
use serde_json::Value;

use crate::server::Server;

/// Prefix that switches a connection into shell mode.
pub const SHELL_PREFIX: &str = "***";

const HELP: &[&str] = &[
    "@name{args}   run a command",
    "*name{args}   inject an event",
    "ls events     list events",
    "ls commands   list commands",
    "ls nodes      list nodes",
    "help          show this help",
    "exit          close the connection",
];

/// Lines to send back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellReply {
    pub lines: Vec<String>,
    /// Close the connection after sending.
    pub close: bool,
}

impl ShellReply {
    fn success(echo: &str, body: Vec<String>) -> Self {
        let mut lines = body;
        lines.push(format!("SUCCESS: {echo}"));
        Self { lines, close: false }
    }

    fn failed(echo: &str, why: impl std::fmt::Display) -> Self {
        Self {
            lines: vec![format!("FAILED: {echo} = {why}")],
            close: false,
        }
    }

    fn outcome(echo: &str, outcome: CommandResult) -> Self {
        match outcome {
            Ok(Value::Null) => Self::success(echo, Vec::new()),
            Ok(value) => Self::success(&format!("{echo} = {value}"), Vec::new()),
            Err(e) => Self::failed(echo, e),
        }
    }
}

/// Greeting sent when shell mode starts.
pub fn banner(server: &Server) -> ShellReply {
    ShellReply::success(
        &format!("lumina shell on {}, type 'help'", server.hostname()),
        Vec::new(),
    )
}

/// Execute one shell line.
pub async fn execute(server: &Server, line: &str) -> ShellReply {
    let input = line.trim();
    tracing::info!(input = %input, "shell request");

    if let Some(text) = input.strip_prefix('@') {
        return match Message::parse(MessageKind::Command, text) {
            Ok(command) => ShellReply::outcome(input, server.run_command(&command, true).await),
            Err(e) => ShellReply::failed(input, e),
        };
    }
    if let Some(text) = input.strip_prefix('*') {
        return match Message::parse(MessageKind::Event, text) {
            Ok(event) => ShellReply::outcome(input, server.handle_event(event).await),
            Err(e) => ShellReply::failed(input, e),
        };
    }

    match input.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["ls", "events"] => ShellReply::success(input, server.event_names()),
        ["ls", "commands"] => ShellReply::success(input, server.command_names()),
        ["ls", "nodes"] => {
            let lines = server
                .nodes()
                .list()
                .into_iter()
                .map(|n| {
                    let status = match &n.status_why {
                        Some(why) => format!("{} ({why})", n.status),
                        None => n.status.to_string(),
                    };
                    format!(
                        "{:<16} {:<8} {:<24} link {}",
                        n.name,
                        if n.connected { "up" } else { "down" },
                        status,
                        n.link
                    )
                })
                .collect();
            ShellReply::success(input, lines)
        }
        ["help"] => ShellReply::success(input, HELP.iter().map(|s| s.to_string()).collect()),
        ["exit"] => ShellReply {
            lines: vec![format!("SUCCESS: {input}")],
            close: true,
        },
        [] => ShellReply {
            lines: Vec::new(),
            close: false,
        },
        _ => ShellReply::failed(input, "unknown request, type 'help'"),
    }
}
