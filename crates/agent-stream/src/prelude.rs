//! Common imports for typical session usage.
pub use crate::{
    AgentEvent, ChatSession, ChatSnapshot, ClientConfig, ClientError, EventTransport,
    HttpTransport, LifecyclePhase, Message, ReplayTransport, Role, SendOutcome, SessionObserver,
    ToolResult, ToolStatus,
};
