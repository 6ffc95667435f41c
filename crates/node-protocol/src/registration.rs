use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Message, ProtocolError, REGISTER, STATUS};

/// Payload of the `register` command a node sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Unique node name; the namespace of its events and commands.
    pub node: String,
    /// Generated per process start.
    pub nodeid: String,
    pub hostname: String,
    pub hostid: String,
    /// Adapter module (e.g. `lu-demo-node`).
    pub module: String,
    /// Fully qualified event names the node may emit.
    #[serde(default)]
    pub events: Vec<String>,
    /// Fully qualified command names routed to the node.
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Registration {
    pub fn to_message(&self) -> Message {
        // a struct of strings always serializes
        let payload = serde_json::to_value(self).unwrap_or(Value::Null);
        Message::command(REGISTER, vec![payload])
    }

    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        if msg.name != REGISTER || !msg.is_command() {
            return Err(ProtocolError::Registration(format!(
                "expected a '{REGISTER}' command, got '{}'",
                msg.name
            )));
        }
        let payload = msg
            .args
            .first()
            .ok_or_else(|| ProtocolError::Registration("missing payload".into()))?;
        let reg: Registration = serde_json::from_value(payload.clone())
            .map_err(|e| ProtocolError::Registration(e.to_string()))?;
        if reg.node.is_empty() {
            return Err(ProtocolError::Registration("empty node name".into()));
        }
        Ok(reg)
    }
}

/// Node health report, sent as `status{state,old_state,reason}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: String,
    pub old_state: String,
    pub reason: Option<String>,
}

impl StatusReport {
    pub fn to_message(&self) -> Message {
        Message::command(
            STATUS,
            vec![
                Value::String(self.state.clone()),
                Value::String(self.old_state.clone()),
                self.reason
                    .as_ref()
                    .map_or(Value::Null, |r| Value::String(r.clone())),
            ],
        )
    }

    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        let text = |i: usize| msg.args.get(i).and_then(Value::as_str).map(str::to_string);
        let state = text(0).ok_or_else(|| ProtocolError::ArgIndex {
            name: msg.name.clone(),
            index: 1,
            count: msg.args.len(),
        })?;
        Ok(Self {
            old_state: text(1).unwrap_or_else(|| state.clone()),
            state,
            reason: text(2).filter(|r| !r.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Registration {
        Registration {
            node: "oppo".into(),
            nodeid: "4c1d".into(),
            hostname: "media-pi".into(),
            hostid: "host-1".into(),
            module: "lu-demo-node".into(),
            events: vec!["oppo/started".into()],
            commands: vec!["oppo/play".into(), "oppo/_info".into()],
            token: None,
        }
    }

    #[test]
    fn registration_travels_as_first_arg() {
        let msg = sample().to_message();
        assert_eq!(msg.name, "register");
        assert!(msg.is_command());
        assert_eq!(msg.args[0]["node"], json!("oppo"));
        assert!(msg.args[0].get("token").is_none());
        assert_eq!(Registration::from_message(&msg).unwrap(), sample());
    }

    #[test]
    fn registration_requires_payload_and_name() {
        let empty = Message::command("register", vec![]);
        assert!(matches!(
            Registration::from_message(&empty),
            Err(ProtocolError::Registration(_))
        ));

        let mut reg = sample();
        reg.node.clear();
        assert!(Registration::from_message(&reg.to_message()).is_err());

        let wrong = Message::command("status", vec![json!({})]);
        assert!(Registration::from_message(&wrong).is_err());
    }

    #[test]
    fn status_report_args() {
        let report = StatusReport {
            state: "RED".into(),
            old_state: "GREEN".into(),
            reason: Some("Timeout".into()),
        };
        let msg = report.to_message();
        assert_eq!(msg.args, vec![json!("RED"), json!("GREEN"), json!("Timeout")]);
        assert_eq!(StatusReport::from_message(&msg).unwrap(), report);

        let bare = Message::command("status", vec![json!("GREEN")]);
        let parsed = StatusReport::from_message(&bare).unwrap();
        assert_eq!(parsed.old_state, "GREEN");
        assert!(parsed.reason.is_none());
    }
}
