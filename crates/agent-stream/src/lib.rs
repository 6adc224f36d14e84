//! Streaming client for agent endpoints that speak an AG-UI style event
//! protocol over server-sent events.
//!
//! A [`ChatSession`] posts the conversation to the endpoint, decodes the
//! streamed records into [`AgentEvent`]s and folds them into messages, tool
//! results, run lifecycle and shared agent state. Every change is published as
//! a [`ChatSnapshot`].
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use agent_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let transport = HttpTransport::new(ClientConfig::new("http://localhost:8000/agent"))?;
//! let session = ChatSession::builder()
//!     .transport(Arc::new(transport))
//!     .build()?;
//!
//! match session.send("Hello").await {
//!     SendOutcome::Finished => {
//!         for message in session.snapshot().messages {
//!             println!("{:?}: {}", message.role, message.content);
//!         }
//!     }
//!     other => eprintln!("run ended: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

/// Environment-driven client configuration.
pub mod config;
/// Pure event fold and the published snapshot.
pub mod conversation;
/// Public error types.
pub mod errors;
/// Wire event model and record decoding.
pub mod event;
/// Run lifecycle tracking and sequence checks.
pub mod lifecycle;
/// Chat messages and the streaming message accumulator.
pub mod message;
/// Process-wide `tracing` setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Run request posted to the endpoint.
pub mod request;
/// Async session driving one endpoint.
pub mod session;
/// Server-sent event record framing.
pub mod sse;
/// Shared agent state with snapshot and JSON-Patch delta support.
pub mod state;
/// Tool call accumulation.
pub mod tool_call;
/// Byte transports for the response stream.
pub mod transport;

pub use config::ClientConfig;
pub use conversation::{Applied, ChatSnapshot, Conversation};
pub use errors::{ClientError, DecodeError, PatchError};
pub use event::{AgentEvent, decode_event, decode_record, encode_record};
pub use lifecycle::{LifecyclePhase, RunError, RunTracker, SequenceIssue, validate_sequence};
pub use message::{Message, MessageAccumulator, Role};
pub use observability::init_observability;
pub use request::RunRequest;
pub use session::{ChatSession, ChatSessionBuilder, SendOutcome, SessionObserver};
pub use sse::{RecordBuffer, split_records};
pub use state::{DeltaReport, PatchOp, StateSynchronizer, apply_op};
pub use tool_call::{ToolCallAccumulator, ToolResult, ToolStatus};
pub use transport::{ByteStream, EventTransport, HttpTransport, ReplayTransport};
