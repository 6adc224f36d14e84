use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agent_stream::init_observability;
use agent_stream::prelude::*;
use clap::Parser;
use tokio::io::AsyncBufReadExt as _;

#[derive(Parser, Debug)]
#[command(name = "agent-stream", about = "Chat with an agent over a streamed event protocol")]
struct Cli {
    /// Agent endpoint the run request is posted to
    #[arg(long, env = "AGENT_STREAM_URL")]
    url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, env = "AGENT_STREAM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Whole-response timeout in seconds
    #[arg(long, default_value_t = 300, env = "AGENT_STREAM_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// Resume an existing thread
    #[arg(long)]
    thread_id: Option<String>,

    /// Replay a recorded event stream file instead of calling the endpoint
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Chunk size in bytes used when replaying
    #[arg(long, default_value_t = 64)]
    chunk_size: usize,

    /// Print the final snapshot as JSON instead of streaming text
    #[arg(long)]
    json: bool,

    /// Message to send; reads one message per stdin line when omitted
    prompt: Vec<String>,
}

async fn build_transport(cli: &Cli) -> Result<Arc<dyn EventTransport>, ClientError> {
    if let Some(path) = &cli.replay {
        let body = tokio::fs::read(path).await.map_err(|e| {
            ClientError::Config(format!("failed to read replay file {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), bytes = body.len(), "replaying recorded stream");
        return Ok(Arc::new(ReplayTransport::from_body(body, cli.chunk_size)));
    }

    let url = cli
        .url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ClientError::Config("pass --url or set AGENT_STREAM_URL".into()))?;
    let mut config = ClientConfig::new(url.trim()).timeout(Duration::from_secs(cli.timeout_secs));
    if let Some(token) = cli.token.as_deref().filter(|t| !t.is_empty()) {
        config = config.bearer_token(token);
    }
    Ok(Arc::new(HttpTransport::new(config)?))
}

/// Keyed by position in the history: message ids only hold within a run.
#[derive(Default)]
struct PrintState {
    printed: HashMap<usize, usize>,
    reported_tools: HashSet<(usize, String)>,
    history_len: usize,
}

impl PrintState {
    /// Text that appeared since the previous snapshot: new assistant content
    /// and tool calls that have just settled.
    fn render(&mut self, snapshot: &ChatSnapshot) -> String {
        if snapshot.messages.len() < self.history_len {
            self.printed.clear();
            self.reported_tools.clear();
        }
        self.history_len = snapshot.messages.len();

        let mut out = String::new();
        for (position, message) in snapshot.messages.iter().enumerate() {
            if message.role != Role::Assistant {
                continue;
            }
            let seen = self.printed.entry(position).or_insert(0);
            if let Some(fresh) = message.content.get(*seen..) {
                out.push_str(fresh);
                *seen = message.content.len();
            }
            for result in &message.tool_results {
                if result.status == ToolStatus::Pending
                    || !self.reported_tools.insert((position, result.id.clone()))
                {
                    continue;
                }
                let input = serde_json::Value::Object(result.input.clone());
                out.push_str(&format!(
                    "\n[{} {:?}] {} -> {}\n",
                    result.tool_name, result.status, input, result.output
                ));
            }
        }
        out
    }
}

#[derive(Default)]
struct PrintObserver {
    state: Mutex<PrintState>,
}

impl SessionObserver for PrintObserver {
    fn on_snapshot(&self, snapshot: &ChatSnapshot) {
        let text = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .render(snapshot);
        if !text.is_empty() {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        }
    }

    fn on_error(&self, error: &str) {
        eprintln!("error: {error}");
    }

    fn on_passthrough(&self, event: &AgentEvent) {
        tracing::debug!(kind = event.kind(), "unhandled event");
    }
}

async fn run(cli: Cli) -> Result<bool, ClientError> {
    let transport = build_transport(&cli).await?;
    let mut builder = ChatSession::builder().transport(transport);
    if !cli.json {
        builder = builder.observer(Arc::new(PrintObserver::default()));
    }
    if let Some(thread_id) = &cli.thread_id {
        builder = builder.thread_id(thread_id.clone());
    }
    let session = builder.build()?;

    let mut ok = true;
    if cli.prompt.is_empty() {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ClientError::Io(format!("failed to read stdin: {e}")))?
        {
            ok &= send_one(&session, &line, cli.json).await;
        }
    } else {
        ok = send_one(&session, &cli.prompt.join(" "), cli.json).await;
    }
    Ok(ok)
}

async fn send_one(session: &ChatSession, prompt: &str, json: bool) -> bool {
    let outcome = session.send(prompt).await;
    tracing::debug!(?outcome, "run ended");
    if json {
        match serde_json::to_string_pretty(&session.snapshot()) {
            Ok(body) => println!("{body}"),
            Err(e) => tracing::error!("failed to serialize snapshot: {e}"),
        }
    } else {
        println!();
    }
    !matches!(outcome, SendOutcome::Errored(_))
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_observability();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_stream::encode_record;

    fn recorded_stream() -> String {
        [
            AgentEvent::run_started("t1", "r1"),
            AgentEvent::text_message_start("m1", Role::Assistant),
            AgentEvent::text_message_content("m1", "Hello"),
            AgentEvent::tool_call_start("tc1", "search", Some("m1".into())),
            AgentEvent::tool_call_args("tc1", r#"{"query":"docs"}"#),
            AgentEvent::tool_call_result("tc1", "3 hits", None),
            AgentEvent::text_message_content("m1", ", world"),
            AgentEvent::text_message_end("m1"),
            AgentEvent::run_finished(),
        ]
        .iter()
        .map(encode_record)
        .collect()
    }

    #[tokio::test]
    async fn replay_file_drives_a_session() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        std::fs::write(file.path(), recorded_stream()).expect("write");
        let path = file.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from(["agent-stream", "--replay", &path, "--chunk-size", "5", "hi"])
            .expect("parse");

        let session = ChatSession::builder()
            .transport(build_transport(&cli).await.expect("transport"))
            .build()
            .expect("session");
        assert_eq!(session.send(cli.prompt.join(" ")).await, SendOutcome::Finished);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.messages[1].content, "Hello, world");
        assert_eq!(snapshot.messages[1].tool_results[0].output, "3 hits");
    }

    #[tokio::test]
    async fn missing_replay_file_is_a_config_error() {
        let cli = Cli::try_parse_from(["agent-stream", "--replay", "/nonexistent/stream.sse", "hi"])
            .expect("parse");
        let err = build_transport(&cli).await.err().expect("should fail");
        assert!(matches!(err, ClientError::Config(msg) if msg.contains("replay file")));
    }

    #[test]
    fn print_state_renders_only_new_output() {
        let mut state = PrintState::default();
        let mut message = Message::new("m1", Role::Assistant, "Hel");
        let mut snapshot = ChatSnapshot {
            messages: vec![Message::user("hi"), message.clone()],
            ..ChatSnapshot::default()
        };
        assert_eq!(state.render(&snapshot), "Hel");

        message.content.push_str("lo");
        let mut result = ToolResult::new("tc1", "search");
        message.upsert_tool_result(result.clone());
        snapshot.messages[1] = message.clone();
        assert_eq!(state.render(&snapshot), "lo");

        result.status = ToolStatus::Success;
        result.output = "done".into();
        message.upsert_tool_result(result);
        snapshot.messages[1] = message;
        assert_eq!(state.render(&snapshot), "\n[search Success] {} -> done\n");
        assert_eq!(state.render(&snapshot), "");
    }

    #[test]
    fn reused_message_id_in_later_run_prints_in_full() {
        let mut state = PrintState::default();
        let mut result = ToolResult::new("tc1", "search");
        result.status = ToolStatus::Success;
        let mut first = Message::new("m1", Role::Assistant, "First answer");
        first.upsert_tool_result(result.clone());
        let mut snapshot = ChatSnapshot {
            messages: vec![Message::user("one"), first],
            ..ChatSnapshot::default()
        };
        assert!(state.render(&snapshot).starts_with("First answer"));

        let mut second = Message::new("m1", Role::Assistant, "Next");
        second.upsert_tool_result(result);
        snapshot.messages.push(Message::user("two"));
        snapshot.messages.push(second);
        assert_eq!(
            state.render(&snapshot),
            "Next\n[search Success] {} -> \n"
        );
    }

    #[test]
    fn cleared_history_starts_over() {
        let mut state = PrintState::default();
        let snapshot = ChatSnapshot {
            messages: vec![Message::user("one"), Message::new("m1", Role::Assistant, "abc")],
            ..ChatSnapshot::default()
        };
        assert_eq!(state.render(&snapshot), "abc");
        assert_eq!(state.render(&ChatSnapshot::default()), "");
        assert_eq!(state.render(&snapshot), "abc");
    }
}
