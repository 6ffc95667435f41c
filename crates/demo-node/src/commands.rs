//! Demo commands: `ping`, `echo`, `fail`, `slow{ms}`, `press{n}` and
//! `set_status{state,reason}`.

use std::time::Duration;

use lu_node_sdk::{CommandContext, CommandError, CommandResult, NodeCommand, NodeHandle, State};
use serde_json::{json, Value};

/// Upper bound for `slow`.
const MAX_SLOW_MS: u64 = 60_000;

/// `ping`: returns `"pong"`.
pub struct Ping;

#[async_trait::async_trait]
impl NodeCommand for Ping {
    async fn call(&self, _ctx: CommandContext, _args: Vec<Value>) -> CommandResult {
        Ok(json!("pong"))
    }
}

/// `echo{...}`: returns its arguments.
pub struct Echo;

#[async_trait::async_trait]
impl NodeCommand for Echo {
    async fn call(&self, _ctx: CommandContext, args: Vec<Value>) -> CommandResult {
        Ok(Value::Array(args))
    }
}

/// `fail{reason}`: always fails with `CommandRun`.
pub struct Fail;

#[async_trait::async_trait]
impl NodeCommand for Fail {
    async fn call(&self, _ctx: CommandContext, args: Vec<Value>) -> CommandResult {
        let reason = args
            .first()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "requested failure".into());
        Err(CommandError::CommandRun(reason))
    }
}

/// `slow{ms}`: sleeps, then returns the delay.  Used to exercise command
/// timeouts.
pub struct Slow;

#[async_trait::async_trait]
impl NodeCommand for Slow {
    async fn call(&self, ctx: CommandContext, args: Vec<Value>) -> CommandResult {
        let ms = match args.first() {
            None => 1000,
            Some(v) => arg_u64(v).ok_or_else(|| {
                CommandError::CommandParse(format!("slow: '{v}' is not a delay in ms"))
            })?,
        };
        if ms > MAX_SLOW_MS {
            return Err(CommandError::CommandParse(format!(
                "slow: delay above {MAX_SLOW_MS} ms"
            )));
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!(ms)),
            _ = ctx.cancel.cancelled() => Err(CommandError::NoConnection),
        }
    }
}

/// `press{n}`: emits the `button{n}` event, as if button `n` was pressed.
pub struct Press {
    pub handle: NodeHandle,
}

#[async_trait::async_trait]
impl NodeCommand for Press {
    async fn call(&self, _ctx: CommandContext, args: Vec<Value>) -> CommandResult {
        let n = args.first().and_then(arg_u64).unwrap_or(1);
        self.handle.send_event("button", vec![json!(n)]);
        Ok(Value::Null)
    }
}

/// `set_status{state,reason}`: change the node health reported to the
/// controller.
pub struct SetStatus {
    pub handle: NodeHandle,
}

#[async_trait::async_trait]
impl NodeCommand for SetStatus {
    async fn call(&self, _ctx: CommandContext, args: Vec<Value>) -> CommandResult {
        let state: State = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::CommandParse("set_status: missing state".into()))?
            .parse()
            .map_err(CommandError::CommandParse)?;
        let reason = args.get(1).and_then(Value::as_str);
        self.handle.set_status(state, reason);
        Ok(json!(state))
    }
}

/// Numbers may arrive as JSON numbers or, from the text syntax, as strings.
fn arg_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
