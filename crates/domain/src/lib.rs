//! Shared domain types for the Lumina controller and its nodes: the command
//! error taxonomy, the four-level health status and the configuration model.

pub mod config;
pub mod error;
pub mod status;

pub use error::{CommandError, CommandResult, Error, ErrorKind, Result};
pub use status::{State, Status, StatusChange};
