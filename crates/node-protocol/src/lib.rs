//! Node protocol: the message model shared by the Lumina controller and its
//! nodes, the `name{a,b}` text syntax, the JSON-line wire encoding and the
//! registration payload.
//!
//! A session is a TCP stream of `\n`-terminated JSON objects:
//!
//! ```text
//! {"type":"command","name":"register","args":[{...}],"requestid":1}
//! {"type":"command","name":"register","args":[],"requestid":1,"response":true,"result":null}
//! {"type":"event","name":"oppo/started","args":[]}
//! ```
//!
//! An empty line is a keepalive.

mod error;
mod ids;
mod message;
mod registration;
mod text;
mod wire;

pub use error::ProtocolError;
pub use ids::RequestIds;
pub use message::{Message, MessageKind};
pub use registration::{Registration, StatusReport};
pub use text::substitute;

/// Command a node sends first to declare itself.
pub const REGISTER: &str = "register";
/// Command a node sends whenever its own health status changes.
pub const STATUS: &str = "status";
/// Event that asks the peer to close the session.
pub const EXIT: &str = "exit";
/// Command every node answers with its identity.
pub const INFO: &str = "_info";
