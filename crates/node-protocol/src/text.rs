//! The `name{arg1,arg2}` text syntax used in rule tables and the admin shell.
//!
//! Arguments are split on `,` with no escaping; the JSON wire format is the
//! unambiguous encoding.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::{Message, MessageKind, ProtocolError};

static TEXT_SYNTAX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^{}]+)(\{(.*)\})?$").expect("static pattern"));

impl Message {
    /// Parse `name` or `name{a,b,...}`.  `name{}` yields no args.
    pub fn parse(kind: MessageKind, text: &str) -> Result<Message, ProtocolError> {
        let (name, args) = split_text(text)?;
        let args = args
            .into_iter()
            .map(|a| Value::String(a.to_string()))
            .collect();
        Ok(Message::new(kind, name, args))
    }

    /// Render back to the text syntax.  Non-string args use their JSON text.
    ///
    /// Lossy for args that contain `,` `{` or `}`, and for a lone empty
    /// string arg, which renders as `name{}` and parses back with no args.
    /// Use [`to_wire`](Message::to_wire) where args must survive.
    pub fn to_text(&self) -> String {
        if self.args.is_empty() {
            return self.name.clone();
        }
        let args: Vec<String> = self.args.iter().map(arg_text).collect();
        format!("{}{{{}}}", self.name, args.join(","))
    }
}

/// Render a command template against the message that triggered it.
///
/// Each argument of the template that is exactly one of these tokens is
/// replaced:
///
/// - `$1..$N`: the source's positional argument (1-based)
/// - `$*`: all of the source's arguments, spliced in place
/// - `$n`: the source's name
pub fn substitute(template: &str, source: &Message) -> Result<Message, ProtocolError> {
    let (name, raw) = split_text(template)?;
    let mut args = Vec::with_capacity(raw.len());
    for token in raw {
        match token {
            "$*" => args.extend(source.args.iter().cloned()),
            "$n" => args.push(Value::String(source.name.clone())),
            t if t.starts_with('$') => {
                let index: usize = t[1..].parse().map_err(|_| ProtocolError::ArgValue {
                    name: name.to_string(),
                    token: t.to_string(),
                })?;
                let value = index
                    .checked_sub(1)
                    .and_then(|i| source.args.get(i))
                    .ok_or_else(|| ProtocolError::ArgIndex {
                        name: name.to_string(),
                        index,
                        count: source.args.len(),
                    })?;
                args.push(value.clone());
            }
            literal => args.push(Value::String(literal.to_string())),
        }
    }
    Ok(Message::command(name, args))
}

fn split_text(text: &str) -> Result<(&str, Vec<&str>), ProtocolError> {
    if text.matches('{').count() != text.matches('}').count() {
        return Err(ProtocolError::Syntax(text.to_string()));
    }
    let caps = TEXT_SYNTAX
        .captures(text)
        .ok_or_else(|| ProtocolError::Syntax(text.to_string()))?;
    let name = caps.get(1).map_or("", |m| m.as_str());
    let args = match caps.get(3).map(|m| m.as_str()) {
        Some(opts) if !opts.is_empty() => opts.split(',').collect(),
        _ => Vec::new(),
    };
    Ok((name, args))
}

fn arg_text(arg: &Value) -> String {
    match arg {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
