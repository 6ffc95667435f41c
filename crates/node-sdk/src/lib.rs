//! `lu-node-sdk`: building blocks for Lumina node adapters, and the session
//! machinery the controller shares with them.
//!
//! A "node" is any process that adapts one device to the controller: it
//! connects over TCP, registers its command and event vocabulary, emits
//! events and serves commands.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Your Node                                                │
//! │                                                           │
//! │   let mut reg = CommandRegistry::new();                   │
//! │   reg.register("play", Play);                             │
//! │   reg.declare_event("started");                           │
//! │                                                           │
//! │   let client = NodeClientBuilder::new()                   │
//! │       .server("hub:5326")                                 │
//! │       .name("oppo")                                       │
//! │       .build()?;                                          │
//! │   let handle = client.handle();   // send_event, status   │
//! │   client.run(reg, shutdown).await;                        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection flow
//!
//! 1. Connect TCP; start the keepalive (empty line every 60s)
//! 2. Send the `register` command with node identity, events and commands
//! 3. On success: push node status, flush events queued while offline
//! 4. Main loop:
//!    - On a command: dispatch to its handler, always reply with the outcome
//!    - On a reply: complete the matching in-flight command
//!    - On `exit`: close
//! 5. On disconnect: fail pending commands with `NoConnection`, reconnect
//!    with jittered exponential back-off
//!
//! # Naming conventions
//!
//! - Handlers are registered under local names (`play`); the controller
//!   sees them qualified by node name (`oppo/play`)
//! - Every node answers `_info` with its identity

pub mod builder;
pub mod client;
pub mod connection;
pub mod link;
pub mod reconnect;
pub mod registry;
pub mod tracker;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::NodeClientBuilder;
pub use client::{local_hostname, NodeClient, NodeHandle};
pub use connection::{Connection, Frame};
pub use link::{respond, Inbound, Link, Outbound};
pub use reconnect::Reconnector;
pub use registry::{CommandRegistry, NodeCommand};
pub use tracker::{Completion, RequestTracker};
pub use types::{CommandContext, NodeSdkError};

// Re-export the shared types so nodes rarely need the other crates directly.
pub use lu_domain::{CommandError, CommandResult, State};
pub use lu_protocol::Message;
