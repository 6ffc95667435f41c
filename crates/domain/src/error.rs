use std::fmt;

/// Shared error type used across all Lumina crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of running a command anywhere in the system.
pub type CommandResult = std::result::Result<serde_json::Value, CommandError>;

/// Stable error categories.  The tag of each kind travels on the wire as the
/// first element of a failed reply's `result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    UnknownCommand,
    Timeout,
    NoConnection,
    CommandParse,
    CommandRun,
    Registration,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Parse,
        ErrorKind::UnknownCommand,
        ErrorKind::Timeout,
        ErrorKind::NoConnection,
        ErrorKind::CommandParse,
        ErrorKind::CommandRun,
        ErrorKind::Registration,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ErrorKind::Parse => "ParseError",
            ErrorKind::UnknownCommand => "UnknownCommand",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::NoConnection => "NoConnection",
            ErrorKind::CommandParse => "CommandParse",
            ErrorKind::CommandRun => "CommandRun",
            ErrorKind::Registration => "Registration",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Failure of a single command.
///
/// Local failures use the typed variants.  A failure reported by a peer with
/// a tag this build does not know is kept verbatim as [`CommandError::Remote`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("timeout")]
    Timeout,

    #[error("no connection")]
    NoConnection,

    #[error("command parse: {0}")]
    CommandParse(String),

    #[error("command failed: {0}")]
    CommandRun(String),

    #[error("registration: {0}")]
    Registration(String),

    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },
}

impl CommandError {
    /// The category, or `None` for an unrecognised remote failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CommandError::Parse(_) => Some(ErrorKind::Parse),
            CommandError::UnknownCommand(_) => Some(ErrorKind::UnknownCommand),
            CommandError::Timeout => Some(ErrorKind::Timeout),
            CommandError::NoConnection => Some(ErrorKind::NoConnection),
            CommandError::CommandParse(_) => Some(ErrorKind::CommandParse),
            CommandError::CommandRun(_) => Some(ErrorKind::CommandRun),
            CommandError::Registration(_) => Some(ErrorKind::Registration),
            CommandError::Remote { .. } => None,
        }
    }

    /// Wire tag for this failure.
    pub fn tag(&self) -> &str {
        match self {
            CommandError::Remote { kind, .. } => kind,
            other => other.kind().map(ErrorKind::tag).unwrap_or("Error"),
        }
    }

    /// Human-readable detail without the kind prefix.
    pub fn detail(&self) -> String {
        match self {
            CommandError::Parse(m)
            | CommandError::UnknownCommand(m)
            | CommandError::CommandParse(m)
            | CommandError::CommandRun(m)
            | CommandError::Registration(m) => m.clone(),
            CommandError::Timeout | CommandError::NoConnection => String::new(),
            CommandError::Remote { message, .. } => message.clone(),
        }
    }

    /// Append `(note)` to the detail.  `Timeout` and `NoConnection` carry no
    /// detail and are returned unchanged.
    pub fn annotated(self, note: &str) -> Self {
        let add = |m: String| {
            if m.is_empty() {
                format!("({note})")
            } else {
                format!("{m} ({note})")
            }
        };
        match self {
            CommandError::Parse(m) => CommandError::Parse(add(m)),
            CommandError::UnknownCommand(m) => CommandError::UnknownCommand(add(m)),
            CommandError::CommandParse(m) => CommandError::CommandParse(add(m)),
            CommandError::CommandRun(m) => CommandError::CommandRun(add(m)),
            CommandError::Registration(m) => CommandError::Registration(add(m)),
            CommandError::Remote { kind, message } => CommandError::Remote {
                kind,
                message: add(message),
            },
            unit @ (CommandError::Timeout | CommandError::NoConnection) => unit,
        }
    }

    /// Rebuild an error from its wire representation.
    pub fn from_parts(tag: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match ErrorKind::from_tag(tag) {
            Some(ErrorKind::Parse) => CommandError::Parse(detail),
            Some(ErrorKind::UnknownCommand) => CommandError::UnknownCommand(detail),
            Some(ErrorKind::Timeout) => CommandError::Timeout,
            Some(ErrorKind::NoConnection) => CommandError::NoConnection,
            Some(ErrorKind::CommandParse) => CommandError::CommandParse(detail),
            Some(ErrorKind::CommandRun) => CommandError::CommandRun(detail),
            Some(ErrorKind::Registration) => CommandError::Registration(detail),
            None => CommandError::Remote {
                kind: tag.to_string(),
                message: detail,
            },
        }
    }

    /// Failures that are part of normal operation with flaky devices.  These
    /// are logged quietly instead of with full context.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            CommandError::CommandRun(_)
                | CommandError::NoConnection
                | CommandError::Timeout
                | CommandError::UnknownCommand(_)
                | CommandError::Remote { .. }
        )
    }

    /// Failures a lenient caller maps to a neutral outcome.
    pub fn is_soft(&self) -> bool {
        matches!(self, CommandError::NoConnection)
    }
}
