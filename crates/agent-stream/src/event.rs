use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::DecodeError;
use crate::message::Role;
use crate::sse::record_data;
use crate::tool_call::ToolStatus;

/// Fields on a known event that this client does not interpret.
///
/// They are kept so newer servers can add fields without breaking decoding.
pub type Extra = Map<String, Value>;

const KNOWN_KINDS: &[&str] = &[
    "RUN_STARTED",
    "RUN_FINISHED",
    "RUN_ERROR",
    "STEP_STARTED",
    "STEP_FINISHED",
    "TEXT_MESSAGE_START",
    "TEXT_MESSAGE_CONTENT",
    "TEXT_MESSAGE_END",
    "TEXT_MESSAGE_CHUNK",
    "TOOL_CALL_START",
    "TOOL_CALL_ARGS",
    "TOOL_CALL_END",
    "TOOL_CALL_RESULT",
    "STATE_SNAPSHOT",
    "STATE_DELTA",
    "MESSAGES_SNAPSHOT",
    "RAW",
    "CUSTOM",
];

/// One decoded event from the agent stream.
///
/// Kinds this client does not know are kept as [`AgentEvent::Unknown`] so the
/// set every consumer matches over stays closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum AgentEvent {
    RunStarted {
        thread_id: String,
        run_id: String,
        #[serde(flatten)]
        extra: Extra,
    },
    RunFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(flatten)]
        extra: Extra,
    },
    RunError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(flatten)]
        extra: Extra,
    },
    StepStarted {
        step_name: String,
        #[serde(flatten)]
        extra: Extra,
    },
    StepFinished {
        step_name: String,
        #[serde(flatten)]
        extra: Extra,
    },
    TextMessageStart {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(flatten)]
        extra: Extra,
    },
    TextMessageContent {
        message_id: String,
        delta: String,
        #[serde(flatten)]
        extra: Extra,
    },
    TextMessageEnd {
        message_id: String,
        #[serde(flatten)]
        extra: Extra,
    },
    /// Start and delta in one payload.
    TextMessageChunk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(default)]
        delta: String,
        #[serde(flatten)]
        extra: Extra,
    },
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
        #[serde(flatten)]
        extra: Extra,
    },
    /// `args` is a JSON text; servers that stream raw fragments send it as
    /// `delta`.
    ToolCallArgs {
        tool_call_id: String,
        #[serde(alias = "delta")]
        args: String,
        #[serde(flatten)]
        extra: Extra,
    },
    ToolCallEnd {
        tool_call_id: String,
        #[serde(flatten)]
        extra: Extra,
    },
    ToolCallResult {
        tool_call_id: String,
        #[serde(default, alias = "content")]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<ToolStatus>,
        #[serde(flatten)]
        extra: Extra,
    },
    StateSnapshot {
        #[serde(alias = "snapshot")]
        state: Value,
        #[serde(flatten)]
        extra: Extra,
    },
    /// Ordered patch operations; each is decoded on its own when applied.
    StateDelta {
        delta: Vec<Value>,
        #[serde(flatten)]
        extra: Extra,
    },
    MessagesSnapshot {
        messages: Vec<Value>,
        #[serde(flatten)]
        extra: Extra,
    },
    Raw {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(flatten)]
        extra: Extra,
    },
    Custom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(flatten)]
        extra: Extra,
    },
    /// A well-formed payload whose kind is not one of the above.
    #[serde(skip)]
    Unknown { kind: String, payload: Value },
}

impl AgentEvent {
    /// Decodes an event from a parsed JSON payload.
    ///
    /// The discriminant is read from `type`, falling back to `kind`.
    pub fn from_value(mut value: Value) -> Result<Self, DecodeError> {
        let Some(object) = value.as_object_mut() else {
            return Err(DecodeError::MissingKind);
        };
        let kind = match object.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => {
                let kind = object
                    .get("kind")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned)
                    .ok_or(DecodeError::MissingKind)?;
                object.remove("kind");
                object.insert("type".into(), Value::String(kind.clone()));
                kind
            }
        };

        if !KNOWN_KINDS.contains(&kind.as_str()) {
            return Ok(Self::Unknown {
                kind,
                payload: value,
            });
        }
        serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
            kind,
            message: e.to_string(),
        })
    }

    /// Wire form of the event (the inverse of [`AgentEvent::from_value`]).
    pub fn to_value(&self) -> Value {
        match self {
            Self::Unknown { payload, .. } => payload.clone(),
            other => serde_json::to_value(other).unwrap_or(Value::Null),
        }
    }

    /// The wire discriminant, e.g. `TEXT_MESSAGE_CONTENT`.
    pub fn kind(&self) -> &str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
            Self::StepStarted { .. } => "STEP_STARTED",
            Self::StepFinished { .. } => "STEP_FINISHED",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            Self::TextMessageChunk { .. } => "TEXT_MESSAGE_CHUNK",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
            Self::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
            Self::StateDelta { .. } => "STATE_DELTA",
            Self::MessagesSnapshot { .. } => "MESSAGES_SNAPSHOT",
            Self::Raw { .. } => "RAW",
            Self::Custom { .. } => "CUSTOM",
            Self::Unknown { kind, .. } => kind,
        }
    }

    /// True for `RUN_FINISHED` and `RUN_ERROR`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }

    pub fn run_started(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::RunStarted {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            extra: Extra::new(),
        }
    }

    pub fn run_finished() -> Self {
        Self::RunFinished {
            thread_id: None,
            run_id: None,
            result: None,
            extra: Extra::new(),
        }
    }

    pub fn run_error(message: impl Into<String>, code: Option<String>) -> Self {
        Self::RunError {
            message: message.into(),
            code,
            extra: Extra::new(),
        }
    }

    pub fn step_started(step_name: impl Into<String>) -> Self {
        Self::StepStarted {
            step_name: step_name.into(),
            extra: Extra::new(),
        }
    }

    pub fn step_finished(step_name: impl Into<String>) -> Self {
        Self::StepFinished {
            step_name: step_name.into(),
            extra: Extra::new(),
        }
    }

    pub fn text_message_start(message_id: impl Into<String>, role: Role) -> Self {
        Self::TextMessageStart {
            message_id: message_id.into(),
            role: Some(role),
            extra: Extra::new(),
        }
    }

    pub fn text_message_content(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextMessageContent {
            message_id: message_id.into(),
            delta: delta.into(),
            extra: Extra::new(),
        }
    }

    pub fn text_message_end(message_id: impl Into<String>) -> Self {
        Self::TextMessageEnd {
            message_id: message_id.into(),
            extra: Extra::new(),
        }
    }

    pub fn text_message_chunk(
        message_id: Option<String>,
        role: Option<Role>,
        delta: impl Into<String>,
    ) -> Self {
        Self::TextMessageChunk {
            message_id,
            role,
            delta: delta.into(),
            extra: Extra::new(),
        }
    }

    pub fn tool_call_start(
        tool_call_id: impl Into<String>,
        tool_call_name: impl Into<String>,
        parent_message_id: Option<String>,
    ) -> Self {
        Self::ToolCallStart {
            tool_call_id: tool_call_id.into(),
            tool_call_name: tool_call_name.into(),
            parent_message_id,
            extra: Extra::new(),
        }
    }

    pub fn tool_call_args(tool_call_id: impl Into<String>, args: impl Into<String>) -> Self {
        Self::ToolCallArgs {
            tool_call_id: tool_call_id.into(),
            args: args.into(),
            extra: Extra::new(),
        }
    }

    pub fn tool_call_end(tool_call_id: impl Into<String>) -> Self {
        Self::ToolCallEnd {
            tool_call_id: tool_call_id.into(),
            extra: Extra::new(),
        }
    }

    pub fn tool_call_result(
        tool_call_id: impl Into<String>,
        result: impl Into<Value>,
        status: Option<ToolStatus>,
    ) -> Self {
        Self::ToolCallResult {
            tool_call_id: tool_call_id.into(),
            result: result.into(),
            status,
            extra: Extra::new(),
        }
    }

    pub fn state_snapshot(state: Value) -> Self {
        Self::StateSnapshot {
            state,
            extra: Extra::new(),
        }
    }

    pub fn state_delta(delta: Vec<Value>) -> Self {
        Self::StateDelta {
            delta,
            extra: Extra::new(),
        }
    }
}

/// Decodes one framed record (`data: <JSON>`) into an event.
pub fn decode_event(record: &str) -> Result<AgentEvent, DecodeError> {
    let data = record_data(record).ok_or(DecodeError::MissingData)?;
    if data.trim() == "[DONE]" {
        return Err(DecodeError::DoneSentinel);
    }
    let value: Value =
        serde_json::from_str(&data).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    AgentEvent::from_value(value)
}

/// Tolerant form of [`decode_event`]: a record that does not decode is
/// dropped with a diagnostic and the stream carries on.
pub fn decode_record(record: &str) -> Option<AgentEvent> {
    match decode_event(record) {
        Ok(event) => Some(event),
        Err(DecodeError::DoneSentinel) => {
            debug!("skipping end-of-stream sentinel");
            None
        }
        Err(err) => {
            warn!(error = %err, record = %preview(record), "dropping undecodable record");
            None
        }
    }
}

/// Frames an event as a wire record, delimiter included.
pub fn encode_record(event: &AgentEvent) -> String {
    format!("data: {}\n\n", event.to_value())
}

fn preview(record: &str) -> &str {
    const MAX: usize = 160;
    if record.len() <= MAX {
        return record;
    }
    let mut end = MAX;
    while !record.is_char_boundary(end) {
        end -= 1;
    }
    &record[..end]
}
