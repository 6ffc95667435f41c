use std::fmt;

use lu_domain::{CommandError, CommandResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Fire-and-forget notification.
    Event,
    /// Request expecting exactly one correlated reply.
    Command,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Event => "event",
            MessageKind::Command => "command",
        }
    }
}

/// A named event or command with opaque JSON arguments.
///
/// A command is dispatched with a `request_id`; its reply carries the same id
/// plus `response` (success flag) and `result`.  A failed reply's result is
/// `[kind_tag, message]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "crate::wire::WireMessage", try_from = "crate::wire::WireMessage")]
pub struct Message {
    pub kind: MessageKind,
    pub name: String,
    pub args: Vec<Value>,
    pub request_id: Option<u64>,
    pub response: Option<bool>,
    pub result: Option<Value>,
}

impl Message {
    pub fn new(kind: MessageKind, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind,
            name: name.into(),
            args,
            request_id: None,
            response: None,
            result: None,
        }
    }

    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(MessageKind::Event, name, args)
    }

    pub fn command(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(MessageKind::Command, name, args)
    }

    pub fn is_command(&self) -> bool {
        self.kind == MessageKind::Command
    }

    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }

    /// `true` once a completion has been recorded.
    pub fn is_completed(&self) -> bool {
        self.response.is_some()
    }

    /// A copy of name, kind and args without request metadata.
    pub fn fresh_copy(&self) -> Self {
        Self::new(self.kind, self.name.clone(), self.args.clone())
    }

    /// The same message renamed.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.name = name.into();
        copy
    }

    /// Record a successful completion.
    pub fn set_success(&mut self, value: Value) -> Result<(), ProtocolError> {
        self.check_completable()?;
        self.response = Some(true);
        self.result = Some(value);
        Ok(())
    }

    /// Record a failed completion as `[kind_tag, message]`.
    pub fn set_fail(&mut self, err: &CommandError) -> Result<(), ProtocolError> {
        self.check_completable()?;
        self.response = Some(false);
        self.result = Some(Value::Array(vec![
            Value::String(err.tag().to_string()),
            Value::String(err.detail()),
        ]));
        Ok(())
    }

    pub fn set_outcome(&mut self, outcome: &CommandResult) -> Result<(), ProtocolError> {
        match outcome {
            Ok(v) => self.set_success(v.clone()),
            Err(e) => self.set_fail(e),
        }
    }

    /// The recorded completion, or `None` while pending.
    pub fn outcome(&self) -> Option<CommandResult> {
        match self.response? {
            true => Some(Ok(self.result.clone().unwrap_or(Value::Null))),
            false => Some(Err(decode_failure(self.result.as_ref()))),
        }
    }

    /// Build the reply to this command carrying `outcome`.
    pub fn reply(&self, outcome: &CommandResult) -> Result<Message, ProtocolError> {
        if !self.is_command() {
            return Err(ProtocolError::NotACommand(self.name.clone()));
        }
        let mut reply = Message::command(self.name.clone(), Vec::new());
        reply.request_id = self.request_id;
        reply.set_outcome(outcome)?;
        Ok(reply)
    }

    fn check_completable(&self) -> Result<(), ProtocolError> {
        if !self.is_command() {
            return Err(ProtocolError::NotACommand(self.name.clone()));
        }
        if self.is_completed() {
            return Err(ProtocolError::AlreadyCompleted(self.name.clone()));
        }
        Ok(())
    }
}

fn decode_failure(result: Option<&Value>) -> CommandError {
    match result {
        Some(Value::Array(parts)) if !parts.is_empty() => {
            let tag = parts[0].as_str().unwrap_or("Error");
            let detail = match parts.get(1) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            CommandError::from_parts(tag, detail)
        }
        Some(Value::String(s)) => CommandError::from_parts("Error", s.clone()),
        Some(other) => CommandError::from_parts("Error", other.to_string()),
        None => CommandError::from_parts("Error", ""),
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.to_text())?;
        if let Some(id) = self.request_id {
            write!(f, " #{id}")?;
        }
        if let Some(response) = self.response {
            let result = self.result.clone().unwrap_or(Value::Null);
            write!(f, " =<{response},{result}>")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_completes_exactly_once() {
        let mut cmd = Message::command("oppo/play", vec![]);
        assert!(cmd.outcome().is_none());
        cmd.set_success(json!("ok")).unwrap();
        assert_eq!(cmd.outcome(), Some(Ok(json!("ok"))));

        let again = cmd.set_fail(&CommandError::Timeout);
        assert_eq!(
            again,
            Err(ProtocolError::AlreadyCompleted("oppo/play".into()))
        );
        assert_eq!(cmd.response, Some(true));
    }

    #[test]
    fn events_cannot_complete() {
        let mut ev = Message::event("oppo/started", vec![]);
        assert!(matches!(
            ev.set_success(Value::Null),
            Err(ProtocolError::NotACommand(_))
        ));
    }

    #[test]
    fn failure_is_a_tag_message_pair() {
        let mut cmd = Message::command("hw50/on", vec![]);
        cmd.set_fail(&CommandError::CommandRun("NAK".into())).unwrap();
        assert_eq!(cmd.result, Some(json!(["CommandRun", "NAK"])));
        assert_eq!(
            cmd.outcome(),
            Some(Err(CommandError::CommandRun("NAK".into())))
        );
    }

    #[test]
    fn foreign_failure_shapes_are_tolerated() {
        let mut cmd = Message::command("x", vec![]);
        cmd.response = Some(false);
        cmd.result = Some(json!(["KeyError", "volume"]));
        assert_eq!(
            cmd.outcome(),
            Some(Err(CommandError::Remote {
                kind: "KeyError".into(),
                message: "volume".into()
            }))
        );

        cmd.result = Some(json!("boom"));
        assert_eq!(cmd.outcome().unwrap().unwrap_err().detail(), "boom");
    }

    #[test]
    fn reply_keeps_request_id() {
        let mut cmd = Message::command("ping", vec![json!(1)]);
        cmd.request_id = Some(42);
        let reply = cmd.reply(&Ok(json!("pong"))).unwrap();
        assert_eq!(reply.request_id, Some(42));
        assert!(reply.args.is_empty());
        assert_eq!(reply.outcome(), Some(Ok(json!("pong"))));
        // the original is untouched
        assert!(cmd.outcome().is_none());
    }

    #[test]
    fn display_shows_meta() {
        let mut cmd = Message::command("a", vec![json!("x")]);
        cmd.request_id = Some(3);
        assert_eq!(cmd.to_string(), "command:a{x} #3");
        cmd.set_success(json!(1)).unwrap();
        assert_eq!(cmd.to_string(), "command:a{x} #3 =<true,1>");
    }
}
