/// Errors raised by a transport or the session API before they are folded
/// into the published `error` field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client or session configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The endpoint answered with a non-success status before streaming.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// Network or stream I/O failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// Local I/O outside the response stream failed.
    #[error("io error: {0}")]
    Io(String),
}

impl ClientError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Returns the HTTP status when this error came from a rejected request.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text shown to the user through the published `error` field.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Reasons a single SSE record did not yield an event.
///
/// These never terminate a stream; the record is dropped with a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The record carries no `data:` line.
    #[error("record has no data field")]
    MissingData,
    /// The `data:` payload is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    /// The payload is the `[DONE]` end-of-stream sentinel.
    #[error("end-of-stream sentinel")]
    DoneSentinel,
    /// The payload is not an object with a string `type` (or `kind`) field.
    #[error("payload has no event type discriminant")]
    MissingKind,
    /// A recognized kind is missing required fields or has ill-typed ones.
    #[error("invalid {kind} payload: {message}")]
    InvalidPayload { kind: String, message: String },
}

/// Reasons a single state patch operation was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// The operation object could not be decoded.
    #[error("malformed patch operation: {0}")]
    Malformed(String),
    /// The operation kind is recognized but not applied by this client.
    #[error("unsupported patch operation `{op}` at {path}")]
    Unsupported { op: &'static str, path: String },
    /// The path is not a valid pointer (must be empty or start with `/`).
    #[error("invalid patch path `{0}`")]
    InvalidPath(String),
    /// A segment of the path crosses a value that is not an object.
    #[error("path {path} crosses a non-object value")]
    NotAnObject { path: String },
    /// The root document cannot be removed.
    #[error("cannot remove the root document")]
    RemoveRoot,
}
