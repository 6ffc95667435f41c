/// Errors produced while decoding, rendering or completing a [`Message`](crate::Message).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid syntax '{0}'")]
    Syntax(String),

    #[error("missing message name")]
    MissingName,

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("line is not valid UTF-8: '{0}'")]
    Encoding(String),

    #[error("malformed JSON: {0}")]
    Json(String),

    #[error("{name} argument index error '${index}', but message has {count} args")]
    ArgIndex {
        name: String,
        index: usize,
        count: usize,
    },

    #[error("{name} argument value error '{token}'")]
    ArgValue { name: String, token: String },

    #[error("{0} is already completed")]
    AlreadyCompleted(String),

    #[error("{0} is not a command")]
    NotACommand(String),

    #[error("invalid registration: {0}")]
    Registration(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e.to_string())
    }
}

impl From<ProtocolError> for lu_domain::CommandError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::ArgIndex { .. } | ProtocolError::ArgValue { .. } => {
                lu_domain::CommandError::CommandParse(e.to_string())
            }
            ProtocolError::Registration(m) => lu_domain::CommandError::Registration(m),
            other => lu_domain::CommandError::Parse(other.to_string()),
        }
    }
}
