//! `lu-controller`: the Lumina controller.
//!
//! Nodes connect over TCP ([`nodes::session`]) and register their command
//! and event vocabularies with the [`server::Server`].  Events they emit go
//! to the [`responder::Responder`], which turns them into commands and
//! expands alias groups; commands are routed back to the owning node.
//!
//! Operators reach the same dispatch path through the admin shell
//! ([`admin`]) and the HTTP status API ([`api`]).

pub mod admin;
pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod nodes;
pub mod responder;
pub mod server;
pub mod state;
