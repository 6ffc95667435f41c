//! Command registry: maps the commands a node serves to their handlers and
//! records the events it declares.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use lu_domain::CommandResult;
use serde_json::Value;

use crate::types::CommandContext;

/// Implement this trait to serve a command sent by the controller.
///
/// # Example
///
/// ```rust,no_run
/// use lu_node_sdk::{CommandContext, NodeCommand};
/// use lu_domain::CommandResult;
///
/// struct Ping;
///
/// #[async_trait::async_trait]
/// impl NodeCommand for Ping {
///     async fn call(&self, _ctx: CommandContext, _args: Vec<serde_json::Value>) -> CommandResult {
///         Ok(serde_json::json!("pong"))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait NodeCommand: Send + Sync + 'static {
    async fn call(&self, ctx: CommandContext, args: Vec<Value>) -> CommandResult;
}

/// Adapter turning an async closure into a [`NodeCommand`].
struct FnCommand<F>(F);

#[async_trait::async_trait]
impl<F, Fut> NodeCommand for FnCommand<F>
where
    F: Fn(CommandContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CommandResult> + Send + 'static,
{
    async fn call(&self, ctx: CommandContext, args: Vec<Value>) -> CommandResult {
        (self.0)(ctx, args).await
    }
}

/// Commands and events a node declares at registration.
///
/// Names are local (`play`, `started`); the client qualifies them with the
/// node name (`oppo/play`) when registering.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn NodeCommand>>,
    events: BTreeSet<String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command handler.  Re-registering a name replaces it.
    pub fn register<T: NodeCommand>(&mut self, name: impl Into<String>, command: T) -> &mut Self {
        self.commands.insert(name.into(), Arc::new(command));
        self
    }

    /// Register a pre-wrapped handler.
    pub fn register_boxed(
        &mut self,
        name: impl Into<String>,
        command: Arc<dyn NodeCommand>,
    ) -> &mut Self {
        self.commands.insert(name.into(), command);
        self
    }

    /// Register an async closure.  Each call receives its own arguments, so
    /// handlers never share state by accident.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(CommandContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        self.register(name, FnCommand(f))
    }

    /// Declare an event the node may emit.
    pub fn declare_event(&mut self, name: impl Into<String>) -> &mut Self {
        self.events.insert(name.into());
        self
    }

    /// Registered command names (sorted).
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Declared event names (sorted).
    pub fn event_names(&self) -> Vec<String> {
        self.events.iter().cloned().collect()
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NodeCommand>> {
        self.commands.get(name).cloned()
    }
}
