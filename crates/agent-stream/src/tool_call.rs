use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::event::AgentEvent;

/// Execution status of a tool invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    #[default]
    Pending,
    Success,
    Error,
}

/// A tool invocation and, once reported, its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub id: String,
    pub tool_name: String,
    /// Arguments merged across every `TOOL_CALL_ARGS` event.
    pub input: Map<String, Value>,
    pub output: String,
    pub status: ToolStatus,
    pub created_at: DateTime<Utc>,
}

impl ToolResult {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            input: Map::new(),
            output: String::new(),
            status: ToolStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
struct ToolCallEntry {
    result: ToolResult,
    parent_message_id: Option<String>,
    /// Argument text that has not parsed yet.
    pending_args: String,
    args_complete: bool,
}

/// Folds tool call events into [`ToolResult`]s for one run.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    entries: HashMap<String, ToolCallEntry>,
    order: Vec<String>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ToolResult> {
        self.entries.get(id).map(|entry| &entry.result)
    }

    /// Parent message named by the call's `TOOL_CALL_START`.
    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.entries
            .get(id)
            .and_then(|entry| entry.parent_message_id.as_deref())
    }

    /// True once `TOOL_CALL_END` has been seen for the call.
    pub fn args_complete(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|entry| entry.args_complete)
    }

    /// Tool calls in start order.
    pub fn results(&self) -> impl Iterator<Item = &ToolResult> {
        self.order.iter().filter_map(|id| self.get(id))
    }

    /// Applies one event and returns the tool call it touched.
    ///
    /// Updates for a call that was never started are ignored.
    pub fn apply(&mut self, event: &AgentEvent) -> Option<&ToolResult> {
        match event {
            AgentEvent::ToolCallStart {
                tool_call_id,
                tool_call_name,
                parent_message_id,
                ..
            } => {
                if !self.entries.contains_key(tool_call_id) {
                    debug!(tool_call_id = %tool_call_id, tool = %tool_call_name, "tool call started");
                    self.order.push(tool_call_id.clone());
                    self.entries.insert(
                        tool_call_id.clone(),
                        ToolCallEntry {
                            result: ToolResult::new(tool_call_id, tool_call_name),
                            parent_message_id: parent_message_id.clone(),
                            pending_args: String::new(),
                            args_complete: false,
                        },
                    );
                }
                self.get(tool_call_id)
            }
            AgentEvent::ToolCallArgs {
                tool_call_id, args, ..
            } => {
                let entry = self.known_entry(tool_call_id, "TOOL_CALL_ARGS")?;
                merge_args(entry, tool_call_id, args);
                Some(&entry.result)
            }
            AgentEvent::ToolCallEnd { tool_call_id, .. } => {
                let entry = self.known_entry(tool_call_id, "TOOL_CALL_END")?;
                entry.args_complete = true;
                if !entry.pending_args.trim().is_empty() {
                    warn!(tool_call_id = %tool_call_id, "tool call arguments ended incomplete");
                }
                Some(&entry.result)
            }
            AgentEvent::ToolCallResult {
                tool_call_id,
                result,
                status,
                ..
            } => {
                let entry = self.known_entry(tool_call_id, "TOOL_CALL_RESULT")?;
                entry.result.output = render_output(result);
                entry.result.status = status.unwrap_or(ToolStatus::Success);
                Some(&entry.result)
            }
            _ => None,
        }
    }

    fn known_entry(&mut self, id: &str, kind: &str) -> Option<&mut ToolCallEntry> {
        let entry = self.entries.get_mut(id);
        if entry.is_none() {
            debug!(tool_call_id = %id, kind, "ignoring update for unknown tool call");
        }
        entry
    }
}

/// Shallow-merges a complete JSON object into the call's input.
///
/// With nothing buffered, a fragment that is a whole object merges at once.
/// Otherwise the fragment is appended and only the concatenation is parsed,
/// so tokens such as `":"` or `5` never merge on their own.
fn merge_args(entry: &mut ToolCallEntry, id: &str, args: &str) {
    if entry.pending_args.is_empty() {
        if args.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<Value>(args) {
            Ok(Value::Object(map)) => entry.result.input.extend(map),
            Ok(other) => {
                warn!(tool_call_id = %id, value = %other, "tool call arguments are not an object");
            }
            Err(err) => {
                debug!(tool_call_id = %id, error = %err, "buffering partial tool call arguments");
                entry.pending_args.push_str(args);
            }
        }
        return;
    }

    entry.pending_args.push_str(args);
    match serde_json::from_str::<Value>(&entry.pending_args) {
        Ok(Value::Object(map)) => {
            entry.result.input.extend(map);
            entry.pending_args.clear();
        }
        Ok(other) => {
            warn!(tool_call_id = %id, value = %other, "tool call arguments are not an object");
            entry.pending_args.clear();
        }
        Err(err) => {
            debug!(tool_call_id = %id, error = %err, pending = entry.pending_args.len(), "buffering partial tool call arguments");
        }
    }
}

fn render_output(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fold(events: &[AgentEvent]) -> ToolCallAccumulator {
        let mut acc = ToolCallAccumulator::new();
        for event in events {
            acc.apply(event);
        }
        acc
    }

    #[test]
    fn start_args_end_result_builds_tool_result() {
        let acc = fold(&[
            AgentEvent::tool_call_start("tc1", "search", Some("msg".into())),
            AgentEvent::tool_call_args("tc1", r#"{"query":"test"}"#),
            AgentEvent::tool_call_end("tc1"),
            AgentEvent::tool_call_result("tc1", "Found 5 results", Some(ToolStatus::Success)),
        ]);
        let result = acc.get("tc1").expect("tool call");
        assert_eq!(result.tool_name, "search");
        assert_eq!(result.input.get("query"), Some(&json!("test")));
        assert_eq!(result.output, "Found 5 results");
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(acc.parent_of("tc1"), Some("msg"));
        assert!(acc.args_complete("tc1"));
    }

    #[test]
    fn args_objects_are_merged_not_replaced() {
        let acc = fold(&[
            AgentEvent::tool_call_start("tc1", "search", None),
            AgentEvent::tool_call_args("tc1", r#"{"query":"test"}"#),
            AgentEvent::tool_call_args("tc1", r#"{"limit":5}"#),
        ]);
        let input = &acc.get("tc1").expect("tool call").input;
        assert_eq!(input.get("query"), Some(&json!("test")));
        assert_eq!(input.get("limit"), Some(&json!(5)));
    }

    #[test]
    fn partial_args_leave_input_untouched_until_complete() {
        let mut acc = fold(&[AgentEvent::tool_call_start("tc1", "search", None)]);
        acc.apply(&AgentEvent::tool_call_args("tc1", r#"{"query":"#));
        assert!(acc.get("tc1").expect("tool call").input.is_empty());

        acc.apply(&AgentEvent::tool_call_args("tc1", r#""full"}"#));
        assert_eq!(
            acc.get("tc1").expect("tool call").input.get("query"),
            Some(&json!("full"))
        );
    }

    fn fold_args(fragments: &[&str]) -> Map<String, Value> {
        let mut events = vec![AgentEvent::tool_call_start("tc1", "search", None)];
        events.extend(fragments.iter().map(|f| AgentEvent::tool_call_args("tc1", *f)));
        fold(&events).get("tc1").expect("tool call").input.clone()
    }

    #[test]
    fn fragmented_args_merge_once_complete() {
        let input = fold_args(&[r#"{"que"#, r#"ry":"te"#, r#"st"}"#]);
        assert_eq!(input.get("query"), Some(&json!("test")));
    }

    #[test]
    fn string_tokens_split_at_json_boundaries() {
        let input = fold_args(&["{\"", "query", "\":\"", "test", "\"}"]);
        assert_eq!(input.get("query"), Some(&json!("test")));
        assert_eq!(input.len(), 1);
    }

    #[test]
    fn scalar_token_inside_pending_object_is_appended() {
        let input = fold_args(&[r#"{"limit":"#, "5", ",", r#""exact":"#, "true", "}"]);
        assert_eq!(input.get("limit"), Some(&json!(5)));
        assert_eq!(input.get("exact"), Some(&json!(true)));
    }

    #[test]
    fn nested_object_fragment_stays_nested() {
        let input = fold_args(&[r#"{"filter":"#, r#"{"x":1}"#, "}"]);
        assert_eq!(input.get("filter"), Some(&json!({"x": 1})));
        assert!(input.get("x").is_none());
    }

    #[test]
    fn whitespace_inside_pending_string_is_kept() {
        let input = fold_args(&[r#"{"q":"a"#, " ", r#"b"}"#]);
        assert_eq!(input.get("q"), Some(&json!("a b")));
    }

    #[test]
    fn standalone_scalar_args_are_ignored() {
        let input = fold_args(&["5", r#"{"query":"ok"}"#]);
        assert_eq!(input.get("query"), Some(&json!("ok")));
        assert_eq!(input.len(), 1);
    }

    #[test]
    fn result_defaults_to_success_and_last_write_wins() {
        let acc = fold(&[
            AgentEvent::tool_call_start("tc1", "calc", None),
            AgentEvent::tool_call_result("tc1", "first", None),
            AgentEvent::tool_call_result("tc1", json!({"value": 2}), Some(ToolStatus::Error)),
        ]);
        let result = acc.get("tc1").expect("tool call");
        assert_eq!(result.output, r#"{"value":2}"#);
        assert_eq!(result.status, ToolStatus::Error);

        let single = fold(&[
            AgentEvent::tool_call_start("tc2", "calc", None),
            AgentEvent::tool_call_result("tc2", "ok", None),
        ]);
        assert_eq!(single.get("tc2").expect("tool call").status, ToolStatus::Success);
    }

    #[test]
    fn updates_for_unknown_calls_are_noops() {
        let acc = fold(&[
            AgentEvent::tool_call_args("ghost", "{}"),
            AgentEvent::tool_call_end("ghost"),
            AgentEvent::tool_call_result("ghost", "x", None),
        ]);
        assert!(acc.get("ghost").is_none());
        assert_eq!(acc.results().count(), 0);
    }

    #[test]
    fn results_follow_start_order() {
        let acc = fold(&[
            AgentEvent::tool_call_start("b", "second", None),
            AgentEvent::tool_call_start("a", "first", None),
            AgentEvent::tool_call_start("b", "second", None),
        ]);
        let ids: Vec<&str> = acc.results().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
