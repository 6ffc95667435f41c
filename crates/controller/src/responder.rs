//! Rule engine: turns events into commands through the action table and
//! expands alias groups into concrete command lists.
//!
//! ```text
//! event "remote/off" ──actions──▶ "__remote/off" ──groups──▶ [oppo/off, hw50/off]
//!                                                               │
//!                                  run_command_list: fan out, join all, decide
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::future::join_all;
use lu_domain::config::ResponderConfig;
use lu_domain::{CommandError, CommandResult};
use lu_protocol::{substitute, Message};
use serde_json::{json, Value};

use crate::server::{EventHandler, Server};

/// Outcome of running a command list, with the aggregate count.
#[derive(Debug, Clone, PartialEq)]
pub struct ListOutcome {
    pub succeeded: usize,
    pub total: usize,
    pub result: CommandResult,
}

pub struct Responder {
    actions: BTreeMap<String, String>,
    groups: BTreeMap<String, Vec<String>>,
    max_depth: usize,
}

impl Responder {
    pub fn new(config: &ResponderConfig) -> Self {
        let (actions, groups) = config.resolve();
        tracing::info!(
            actions = actions.len(),
            groups = groups.len(),
            max_depth = config.max_depth,
            "responder rules loaded"
        );
        Self {
            actions,
            groups,
            max_depth: config.max_depth,
        }
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Expand `command` into concrete commands.
    ///
    /// A name that is not an alias yields `[command]` unchanged.  Aliases are
    /// rendered template by template against `command` and expanded again,
    /// in template order.  Expanding at `depth >= max_depth` fails, which
    /// bounds alias cycles.
    pub fn get_command_list(&self, command: &Message, depth: usize) -> Result<Vec<Message>, CommandError> {
        let Some(templates) = self.groups.get(&command.name) else {
            return Ok(vec![command.clone()]);
        };
        if depth >= self.max_depth {
            return Err(CommandError::CommandParse(format!(
                "too many command group levels ({depth}), loop?"
            )));
        }
        let mut list = Vec::new();
        for template in templates {
            let rendered = substitute(template, command).map_err(|e| {
                CommandError::CommandParse(format!("command parsing failed: {e}"))
            })?;
            list.extend(self.get_command_list(&rendered, depth + 1)?);
        }
        Ok(list)
    }

    /// Run every command of `list` concurrently, leniently, and wait for
    /// all of them.  Success needs every command to succeed; otherwise the
    /// first failure in list order is the result.
    ///
    /// A list that is just `command` itself runs it directly and strictly.
    pub async fn run_command_list(
        &self,
        server: &Server,
        command: &Message,
        list: Vec<Message>,
    ) -> ListOutcome {
        if list.len() == 1 && list[0] == *command {
            let result = server.run_command(command, true).await;
            let succeeded = usize::from(result.is_ok());
            return ListOutcome {
                succeeded,
                total: 1,
                result,
            };
        }

        tracing::info!(command = %command, list = ?list.iter().map(|c| c.to_text()).collect::<Vec<_>>(), "running command list");
        let total = list.len();
        let results = join_all(list.iter().map(|c| server.run_command(c, false))).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        if succeeded == total {
            let values: Vec<Value> = results.into_iter().filter_map(Result::ok).collect();
            tracing::info!(command = %command, succeeded, total, "command list ok");
            return ListOutcome {
                succeeded,
                total,
                result: Ok(json!({
                    "succeeded": succeeded,
                    "total": total,
                    "results": values,
                })),
            };
        }

        let first = results
            .into_iter()
            .find_map(Result::err)
            .unwrap_or_else(|| CommandError::CommandRun("command list failed".into()))
            .annotated(&format!("{succeeded}/{total} succeeded"));
        tracing::error!(
            command = %command,
            succeeded,
            total,
            error = %first,
            "command list failed"
        );
        ListOutcome {
            succeeded,
            total,
            result: Err(first),
        }
    }

    /// Expand and run `command`.
    pub async fn run_command(&self, server: &Server, command: &Message) -> CommandResult {
        tracing::info!(command = %command, "running");
        let list = match self.get_command_list(command, 0) {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(command = %command, args = ?command.args, error = ?e, "alias expansion failed");
                return Err(e);
            }
        };
        self.run_command_list(server, command, list).await.result
    }
}

#[async_trait]
impl EventHandler for Responder {
    async fn handle_event(&self, server: &Server, event: Message) -> CommandResult {
        let Some(action) = self.actions.get(&event.name) else {
            tracing::info!(event = %event, "ignoring event");
            return Ok(Value::Null);
        };
        let command = match substitute(action, &event) {
            Ok(c) => c,
            Err(e) => {
                let err = CommandError::CommandParse(format!("command parsing failed: {e}"));
                tracing::error!(event = %event, action = %action, error = ?err, "cannot render action");
                return Err(err);
            }
        };
        tracing::info!(event = %event, command = %command.to_text(), "event -> command");
        self.run_command(server, &command).await
    }

    fn aliases(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    async fn run_alias(&self, server: &Server, command: Message) -> CommandResult {
        self.run_command(server, &command).await
    }
}
