use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::event::AgentEvent;
use crate::lifecycle::{LifecyclePhase, RunError, RunTracker, SequenceIssue};
use crate::message::{Message, MessageAccumulator};
use crate::state::StateSynchronizer;
use crate::tool_call::ToolCallAccumulator;

/// Published view of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub messages: Vec<Message>,
    pub is_streaming: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_state: Option<Value>,
    pub completed_steps: Vec<String>,
    pub lifecycle: LifecyclePhase,
    /// Ordering rules the current run's stream broke.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sequence_issues: Vec<SequenceIssue>,
}

/// What applying one event did, as far as the driver is concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// State changed (or not); keep reading.
    Continue,
    /// `TEXT_MESSAGE_END` for a known message; carries its final content.
    MessageCompleted(Message),
    /// An event this client does not fold; handed to the observer as is.
    Passthrough,
    /// `RUN_FINISHED`.
    Finished,
    /// `RUN_ERROR`; the stream must not be read further.
    Errored(RunError),
}

/// Folds decoded events into messages, tool results, lifecycle and state.
///
/// Pure and synchronous: the async session owns one and feeds it events in
/// arrival order.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: MessageAccumulator,
    tool_calls: ToolCallAccumulator,
    tracker: RunTracker,
    state: StateSynchronizer,
    thread_id: Option<String>,
    run_id: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes an existing thread.
    pub fn with_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.messages()
    }

    pub fn tool_calls(&self) -> &ToolCallAccumulator {
        &self.tool_calls
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    pub fn agent_state(&self) -> Option<&Value> {
        self.state.state()
    }

    /// Thread id of the latest run, kept across runs for resumption.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Starts bookkeeping for a new run. History, ids and state carry over;
    /// the tool call map and lifecycle start fresh.
    pub fn begin_run(&mut self) {
        self.messages.begin_run();
        self.tool_calls = ToolCallAccumulator::new();
        self.tracker = RunTracker::new();
    }

    /// Drops messages, state and ids.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.tool_calls = ToolCallAccumulator::new();
        self.tracker = RunTracker::new();
        self.state.clear();
        self.thread_id = None;
        self.run_id = None;
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Applies one event to every component it concerns.
    pub fn apply(&mut self, event: &AgentEvent) -> Applied {
        let was_idle = self.tracker.phase() == LifecyclePhase::Idle;
        self.tracker.observe(event);

        match event {
            AgentEvent::RunStarted {
                thread_id, run_id, ..
            } => {
                // A duplicate start is only reported; the first run's ids stand.
                if was_idle {
                    self.thread_id = Some(thread_id.clone());
                    self.run_id = Some(run_id.clone());
                }
                Applied::Continue
            }
            AgentEvent::RunFinished { .. } => Applied::Finished,
            AgentEvent::RunError { message, code, .. } => Applied::Errored(RunError {
                message: message.clone(),
                code: code.clone(),
            }),
            AgentEvent::StepStarted { .. } | AgentEvent::StepFinished { .. } => Applied::Continue,
            AgentEvent::TextMessageStart { .. }
            | AgentEvent::TextMessageContent { .. }
            | AgentEvent::TextMessageChunk { .. } => {
                let touched = self.messages.apply(event).map(|m| m.id.clone());
                if let Some(id) = touched {
                    self.attach_pending_tool_results(&id);
                }
                Applied::Continue
            }
            AgentEvent::TextMessageEnd { .. } => match self.messages.apply(event) {
                Some(message) => Applied::MessageCompleted(message.clone()),
                None => Applied::Continue,
            },
            AgentEvent::ToolCallStart { tool_call_id, .. }
            | AgentEvent::ToolCallArgs { tool_call_id, .. }
            | AgentEvent::ToolCallEnd { tool_call_id, .. }
            | AgentEvent::ToolCallResult { tool_call_id, .. } => {
                if self.tool_calls.apply(event).is_some() {
                    self.sync_tool_result(tool_call_id);
                }
                Applied::Continue
            }
            AgentEvent::StateSnapshot { state, .. } => {
                self.state.apply_snapshot(state.clone());
                Applied::Continue
            }
            AgentEvent::StateDelta { delta, .. } => {
                let report = self.state.apply_delta(delta);
                debug!(applied = report.applied, skipped = report.skipped.len(), "state delta applied");
                Applied::Continue
            }
            AgentEvent::MessagesSnapshot { .. }
            | AgentEvent::Raw { .. }
            | AgentEvent::Custom { .. }
            | AgentEvent::Unknown { .. } => Applied::Passthrough,
        }
    }

    /// Copies the call's current state into its parent message.
    fn sync_tool_result(&mut self, tool_call_id: &str) {
        let Some(result) = self.tool_calls.get(tool_call_id).cloned() else {
            return;
        };
        let Some(parent_id) = self.tool_calls.parent_of(tool_call_id).map(ToOwned::to_owned) else {
            return;
        };
        match self.messages.get_mut(&parent_id) {
            Some(parent) => parent.upsert_tool_result(result),
            None => {
                debug!(tool_call_id = %tool_call_id, parent_message_id = %parent_id, "parent message not streamed yet");
            }
        }
    }

    /// Attaches calls that named `message_id` as parent before it existed.
    fn attach_pending_tool_results(&mut self, message_id: &str) {
        let pending: Vec<_> = self
            .tool_calls
            .results()
            .filter(|r| self.tool_calls.parent_of(&r.id) == Some(message_id))
            .cloned()
            .collect();
        if pending.is_empty() {
            return;
        }
        if let Some(parent) = self.messages.get_mut(message_id) {
            for result in pending {
                if !parent.tool_results.iter().any(|r| r.id == result.id) {
                    parent.tool_results.push(result);
                }
            }
        }
    }

    /// Builds the published view.
    pub fn snapshot(&self, is_streaming: bool, error: Option<String>) -> ChatSnapshot {
        ChatSnapshot {
            messages: self.messages.messages().to_vec(),
            is_streaming,
            error,
            current_thread_id: self.thread_id.clone(),
            current_run_id: self.run_id.clone(),
            agent_state: self.state.state().cloned(),
            completed_steps: self.tracker.completed_steps().to_vec(),
            lifecycle: self.tracker.phase(),
            sequence_issues: self.tracker.issues().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::tool_call::ToolStatus;
    use serde_json::json;

    fn run(events: &[AgentEvent]) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.begin_run();
        for event in events {
            conversation.apply(event);
        }
        conversation
    }

    #[test]
    fn tool_result_is_attached_to_parent_message() {
        let conversation = run(&[
            AgentEvent::run_started("t", "r"),
            AgentEvent::text_message_start("parentMsg", Role::Assistant),
            AgentEvent::tool_call_start("tc1", "search", Some("parentMsg".into())),
            AgentEvent::tool_call_args("tc1", r#"{"query":"test"}"#),
            AgentEvent::tool_call_end("tc1"),
            AgentEvent::tool_call_result("tc1", "Found 5 results", Some(ToolStatus::Success)),
            AgentEvent::run_finished(),
        ]);
        let parent = &conversation.messages()[0];
        assert_eq!(parent.tool_results.len(), 1);
        let result = &parent.tool_results[0];
        assert_eq!(result.id, "tc1");
        assert_eq!(result.tool_name, "search");
        assert_eq!(result.input.get("query"), Some(&json!("test")));
        assert_eq!(result.output, "Found 5 results");
        assert_eq!(result.status, ToolStatus::Success);
    }

    #[test]
    fn tool_results_keep_start_order_and_accumulate_independently() {
        let conversation = run(&[
            AgentEvent::text_message_start("m", Role::Assistant),
            AgentEvent::tool_call_start("a", "search", Some("m".into())),
            AgentEvent::tool_call_start("b", "fetch", Some("m".into())),
            AgentEvent::tool_call_args("b", r#"{"url":"x"}"#),
            AgentEvent::tool_call_args("a", r#"{"query":"y"}"#),
            AgentEvent::tool_call_result("b", "page", None),
        ]);
        let results = &conversation.messages()[0].tool_results;
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(results[0].input.get("query"), Some(&json!("y")));
        assert_eq!(results[0].status, ToolStatus::Pending);
        assert_eq!(results[1].input.get("url"), Some(&json!("x")));
        assert_eq!(results[1].output, "page");
    }

    #[test]
    fn tool_call_before_parent_is_attached_when_parent_appears() {
        let conversation = run(&[
            AgentEvent::tool_call_start("tc", "search", Some("late".into())),
            AgentEvent::tool_call_args("tc", r#"{"q":1}"#),
            AgentEvent::text_message_content("late", "hi"),
        ]);
        let parent = &conversation.messages()[0];
        assert_eq!(parent.id, "late");
        assert_eq!(parent.tool_results.len(), 1);
        assert_eq!(parent.tool_results[0].input.get("q"), Some(&json!(1)));
    }

    #[test]
    fn end_reports_completed_message() {
        let mut conversation = Conversation::new();
        conversation.apply(&AgentEvent::text_message_content("m", "done"));
        match conversation.apply(&AgentEvent::text_message_end("m")) {
            Applied::MessageCompleted(message) => assert_eq!(message.content, "done"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lifecycle_and_state_are_published() {
        let conversation = run(&[
            AgentEvent::run_started("thread", "run"),
            AgentEvent::state_snapshot(json!({"counter": 0, "mode": "active"})),
            AgentEvent::state_delta(vec![json!({"op": "replace", "path": "/counter", "value": 1})]),
            AgentEvent::step_started("s1"),
            AgentEvent::step_finished("s1"),
        ]);
        let snapshot = conversation.snapshot(true, None);
        assert_eq!(snapshot.current_thread_id.as_deref(), Some("thread"));
        assert_eq!(snapshot.current_run_id.as_deref(), Some("run"));
        assert_eq!(
            snapshot.agent_state,
            Some(json!({"counter": 1, "mode": "active"}))
        );
        assert_eq!(snapshot.completed_steps, vec!["s1".to_string()]);
        assert_eq!(snapshot.lifecycle, LifecyclePhase::Running);
    }

    #[test]
    fn passthrough_and_terminal_outcomes() {
        let mut conversation = Conversation::new();
        let snapshot = AgentEvent::from_value(json!({"type": "MESSAGES_SNAPSHOT", "messages": []}))
            .expect("decode");
        assert_eq!(conversation.apply(&snapshot), Applied::Passthrough);
        assert_eq!(conversation.apply(&AgentEvent::run_finished()), Applied::Finished);
        assert_eq!(
            conversation.apply(&AgentEvent::run_error("boom", None)),
            Applied::Errored(RunError {
                message: "boom".into(),
                code: None
            })
        );
        assert!(conversation.messages().is_empty());
    }

    #[test]
    fn duplicate_run_started_keeps_first_ids() {
        let conversation = run(&[
            AgentEvent::run_started("t1", "r1"),
            AgentEvent::run_started("t2", "r2"),
        ]);
        assert_eq!(conversation.thread_id(), Some("t1"));
        assert_eq!(conversation.run_id(), Some("r1"));
        assert_eq!(
            conversation.tracker().issues(),
            &[SequenceIssue::DuplicateRunStarted]
        );

        let snapshot = conversation.snapshot(true, None);
        assert_eq!(snapshot.sequence_issues, vec![SequenceIssue::DuplicateRunStarted]);
        let body = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(body["sequenceIssues"][0]["issue"], "DUPLICATE_RUN_STARTED");
    }

    #[test]
    fn clear_resets_everything() {
        let mut conversation = run(&[
            AgentEvent::run_started("t", "r"),
            AgentEvent::text_message_content("m", "x"),
            AgentEvent::state_snapshot(json!({"a": 1})),
        ]);
        conversation.clear();
        let snapshot = conversation.snapshot(false, None);
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.agent_state, None);
        assert_eq!(snapshot.current_thread_id, None);
        assert_eq!(snapshot.lifecycle, LifecyclePhase::Idle);
    }
}
