//! JSON-line encoding of [`Message`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Message, MessageKind, ProtocolError};

/// On-the-wire shape.  Every field is optional on input so that decoding
/// can report precise errors.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    args: Option<Vec<Value>>,
    #[serde(rename = "requestid", default, skip_serializing_if = "Option::is_none")]
    request_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

impl From<Message> for WireMessage {
    fn from(m: Message) -> Self {
        let completed = m.response.is_some();
        Self {
            kind: Some(m.kind.as_str().to_string()),
            name: Some(m.name),
            args: Some(m.args),
            request_id: m.request_id,
            response: m.response,
            // a completed reply always carries `result`, even when null
            result: if completed {
                Some(m.result.unwrap_or(Value::Null))
            } else {
                None
            },
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = ProtocolError;

    fn try_from(w: WireMessage) -> Result<Self, Self::Error> {
        let name = w.name.ok_or(ProtocolError::MissingName)?;
        let kind = match w.kind.as_deref() {
            Some("event") => MessageKind::Event,
            Some("command") => MessageKind::Command,
            Some(other) => return Err(ProtocolError::UnknownType(other.to_string())),
            None if w.request_id.is_some() => MessageKind::Command,
            None => MessageKind::Event,
        };
        let mut msg = Message::new(kind, name, w.args.unwrap_or_default());
        if kind == MessageKind::Command {
            msg.request_id = w.request_id;
            msg.response = w.response;
            if msg.response.is_some() {
                msg.result = Some(w.result.unwrap_or(Value::Null));
            }
        }
        Ok(msg)
    }
}

impl Message {
    /// Encode as one JSON line (without the trailing newline).
    pub fn to_wire(&self) -> String {
        let wire = WireMessage::from(self.clone());
        // WireMessage holds only strings, numbers and JSON values
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Decode one JSON line.
    pub fn from_wire(line: &str) -> Result<Message, ProtocolError> {
        let wire: WireMessage = serde_json::from_str(line)?;
        Message::try_from(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lu_domain::CommandError;
    use serde_json::json;

    #[test]
    fn event_encodes_without_request_meta() {
        let ev = Message::event("oppo/started", vec![json!(1)]);
        let v: Value = serde_json::from_str(&ev.to_wire()).unwrap();
        assert_eq!(v, json!({"type": "event", "name": "oppo/started", "args": [1]}));
    }

    #[test]
    fn command_and_reply_round_trip() {
        let mut cmd = Message::command("hw50/power", vec![json!("on"), json!(2)]);
        cmd.request_id = Some(7);
        assert_eq!(Message::from_wire(&cmd.to_wire()).unwrap(), cmd);

        let reply = cmd.reply(&Err(CommandError::Timeout)).unwrap();
        let v: Value = serde_json::from_str(&reply.to_wire()).unwrap();
        assert_eq!(v["requestid"], json!(7));
        assert_eq!(v["response"], json!(false));
        assert_eq!(v["result"], json!(["Timeout", ""]));
        assert_eq!(Message::from_wire(&reply.to_wire()).unwrap(), reply);
    }

    #[test]
    fn null_success_result_is_kept() {
        let mut cmd = Message::command("ping", vec![]);
        cmd.request_id = Some(1);
        let reply = cmd.reply(&Ok(Value::Null)).unwrap();
        let v: Value = serde_json::from_str(&reply.to_wire()).unwrap();
        assert_eq!(v["result"], Value::Null);
        assert!(v.as_object().unwrap().contains_key("result"));
        let back = Message::from_wire(&reply.to_wire()).unwrap();
        assert_eq!(back.outcome(), Some(Ok(Value::Null)));
    }

    #[test]
    fn missing_name_is_rejected() {
        assert_eq!(
            Message::from_wire(r#"{"type":"event","args":[]}"#),
            Err(ProtocolError::MissingName)
        );
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            Message::from_wire("{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert_eq!(
            Message::from_wire(r#"{"type":"message","name":"x"}"#),
            Err(ProtocolError::UnknownType("message".into()))
        );
    }

    #[test]
    fn missing_type_is_inferred_from_request_id() {
        let ev = Message::from_wire(r#"{"name":"x"}"#).unwrap();
        assert!(ev.is_event());
        assert!(ev.args.is_empty());

        let cmd = Message::from_wire(r#"{"name":"x","requestid":3}"#).unwrap();
        assert!(cmd.is_command());
        assert_eq!(cmd.request_id, Some(3));
    }

    #[test]
    fn events_drop_request_meta_on_decode() {
        let ev = Message::from_wire(r#"{"type":"event","name":"x","requestid":4,"response":true}"#)
            .unwrap();
        assert_eq!(ev.request_id, None);
        assert_eq!(ev.response, None);
    }

    #[test]
    fn message_embeds_in_serde_json() {
        let cmd = Message::command("a", vec![json!("b")]);
        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["type"], json!("command"));
        let back: Message = serde_json::from_value(v).unwrap();
        assert_eq!(back, cmd);
    }
}
