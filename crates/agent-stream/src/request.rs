use serde::Serialize;
use serde_json::Value;

use crate::message::Message;

/// Body posted to the agent endpoint to start a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Thread to resume, when a previous run reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Id of the previous run on the thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Full message history, newest last.
    pub messages: Vec<Message>,
    /// Latest agent state, when the agent has published one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_skips_absent_ids() {
        let request = RunRequest {
            thread_id: None,
            run_id: None,
            messages: vec![Message::user("hi")],
            state: None,
        };
        let body = serde_json::to_value(&request).expect("serialize");
        assert!(body.get("threadId").is_none());
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body["messages"][0].get("createdAt").is_some());

        let resumed = RunRequest {
            thread_id: Some("t1".into()),
            run_id: Some("r1".into()),
            ..request
        };
        let body = serde_json::to_value(&resumed).expect("serialize");
        assert_eq!(body["threadId"], "t1");
        assert_eq!(body["runId"], "r1");
    }
}
