use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::conversation::{Applied, ChatSnapshot, Conversation};
use crate::errors::ClientError;
use crate::event::{AgentEvent, decode_record};
use crate::lifecycle::SequenceIssue;
use crate::message::Message;
use crate::request::RunRequest;
use crate::sse::RecordBuffer;
use crate::transport::{ByteStream, EventTransport};

/// Receives session notifications. Every method defaults to a no-op.
///
/// Callbacks run on the task driving the stream, after the session lock has
/// been released, so they may call back into the session.
pub trait SessionObserver: Send + Sync {
    /// Called after every published change.
    fn on_snapshot(&self, _snapshot: &ChatSnapshot) {}
    /// Called when a transport failure or `RUN_ERROR` sets the error.
    fn on_error(&self, _error: &str) {}
    /// Called on `TEXT_MESSAGE_END` with the final message.
    fn on_message_completed(&self, _message: &Message) {}
    /// Called when an event breaks the run's ordering rules. The event is
    /// still applied.
    fn on_sequence_issue(&self, _issue: &SequenceIssue) {}
    /// Called for events the session does not fold (`MESSAGES_SNAPSHOT`,
    /// `RAW`, `CUSTOM` and unknown kinds).
    fn on_passthrough(&self, _event: &AgentEvent) {}
}

/// How a call to [`ChatSession::send`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Another send was still in flight; nothing was sent.
    Rejected,
    /// The content was blank; nothing was sent.
    Empty,
    /// The run ended with `RUN_FINISHED`.
    Finished,
    /// The run ended with `RUN_ERROR` or a transport failure.
    Errored(String),
    /// The response closed without a terminal event.
    Closed,
    /// [`ChatSession::clear`] was called while the run was in flight.
    Superseded,
}

struct SessionState {
    conversation: Conversation,
    in_flight: bool,
    is_streaming: bool,
    error: Option<String>,
    /// Bumped by `clear`; a read loop started under an older value stops
    /// applying events.
    generation: u64,
}

impl SessionState {
    fn snapshot(&self) -> ChatSnapshot {
        self.conversation
            .snapshot(self.is_streaming, self.error.clone())
    }

    fn end_run(&mut self) {
        self.in_flight = false;
        self.is_streaming = false;
    }
}

struct SessionInner {
    transport: Arc<dyn EventTransport>,
    observer: Option<Arc<dyn SessionObserver>>,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<ChatSnapshot>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes the state held by `guard` and releases the lock.
    fn publish(&self, guard: MutexGuard<'_, SessionState>) -> ChatSnapshot {
        let snapshot = guard.snapshot();
        self.snapshot_tx.send_replace(snapshot.clone());
        drop(guard);
        if let Some(observer) = &self.observer {
            observer.on_snapshot(&snapshot);
        }
        snapshot
    }

    fn notify_error(&self, message: &str) {
        if let Some(observer) = &self.observer {
            observer.on_error(message);
        }
    }
}

/// A conversation with one agent endpoint.
///
/// Cheap to clone; clones share the same conversation. At most one send is
/// in flight at a time.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn builder() -> ChatSessionBuilder {
        ChatSessionBuilder::default()
    }

    /// Latest published state.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Receiver that observes every published state.
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().is_streaming
    }

    /// Sends a user message and streams the agent's response to completion.
    ///
    /// Returns [`SendOutcome::Rejected`] without touching the transport while
    /// a previous send is still running. Failures are reported through the
    /// published `error` and the observer, never as a panic or `Err`.
    pub async fn send(&self, content: impl Into<String>) -> SendOutcome {
        let content = content.into();
        if content.trim().is_empty() {
            return SendOutcome::Empty;
        }

        let (generation, request) = {
            let mut state = self.inner.lock();
            if state.in_flight {
                debug!("send rejected: a run is already in flight");
                return SendOutcome::Rejected;
            }
            state.in_flight = true;
            state.is_streaming = true;
            state.error = None;
            state.conversation.push_message(Message::user(content));
            state.conversation.begin_run();
            let generation = state.generation;
            let request = RunRequest {
                thread_id: state.conversation.thread_id().map(ToOwned::to_owned),
                run_id: state.conversation.run_id().map(ToOwned::to_owned),
                messages: state.conversation.messages().to_vec(),
                state: state.conversation.agent_state().cloned(),
            };
            self.inner.publish(state);
            (generation, request)
        };

        debug!(generation, thread_id = ?request.thread_id, "opening agent stream");
        let body = match self.inner.transport.open(request).await {
            Ok(body) => body,
            Err(err) => return self.fail(generation, &err),
        };
        self.drive(generation, body).await
    }

    /// Appends a message to the conversation without sending it.
    pub fn add_message(&self, message: Message) {
        let mut state = self.inner.lock();
        state.conversation.push_message(message);
        self.inner.publish(state);
    }

    /// Resets messages, tool calls, agent state, ids and error.
    ///
    /// A send that is still streaming stops applying events; its outcome is
    /// [`SendOutcome::Superseded`].
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.generation = state.generation.wrapping_add(1);
        state.conversation.clear();
        state.end_run();
        state.error = None;
        debug!(generation = state.generation, "session cleared");
        self.inner.publish(state);
    }

    /// Sets or clears the user-visible error.
    pub fn set_error(&self, error: Option<String>) {
        let mut state = self.inner.lock();
        state.error = error.clone();
        self.inner.publish(state);
        if let Some(message) = error {
            self.inner.notify_error(&message);
        }
    }

    async fn drive(&self, generation: u64, mut body: ByteStream) -> SendOutcome {
        let mut buffer = RecordBuffer::new();
        loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    if let Some(outcome) = self.apply_records(generation, buffer.push_chunk(&chunk)) {
                        return outcome;
                    }
                }
                Some(Err(err)) => return self.fail(generation, &err),
                None => {
                    let tail: Vec<String> = buffer.finish().into_iter().collect();
                    if let Some(outcome) = self.apply_records(generation, tail) {
                        return outcome;
                    }
                    return self.close(generation);
                }
            }
        }
    }

    /// Applies records in order; returns an outcome once the run is over.
    fn apply_records(&self, generation: u64, records: Vec<String>) -> Option<SendOutcome> {
        for record in records {
            let Some(event) = decode_record(&record) else {
                continue;
            };
            if let Some(outcome) = self.apply_event(generation, &event) {
                return Some(outcome);
            }
        }
        None
    }

    fn apply_event(&self, generation: u64, event: &AgentEvent) -> Option<SendOutcome> {
        let mut state = self.inner.lock();
        if state.generation != generation {
            debug!(kind = event.kind(), "dropping event from superseded run");
            return Some(SendOutcome::Superseded);
        }
        let known_issues = state.conversation.tracker().issues().len();
        let applied = state.conversation.apply(event);
        let new_issues: Vec<SequenceIssue> = state
            .conversation
            .tracker()
            .issues()
            .iter()
            .skip(known_issues)
            .cloned()
            .collect();
        debug!(kind = event.kind(), run_id = ?state.conversation.run_id(), "applied event");
        let outcome = match &applied {
            Applied::Finished => {
                state.end_run();
                Some(SendOutcome::Finished)
            }
            Applied::Errored(err) => {
                state.end_run();
                state.error = Some(err.message.clone());
                Some(SendOutcome::Errored(err.message.clone()))
            }
            _ => None,
        };
        self.inner.publish(state);

        if let Some(observer) = &self.inner.observer {
            for issue in &new_issues {
                debug!(?issue, "event out of sequence");
                observer.on_sequence_issue(issue);
            }
        }
        match applied {
            Applied::MessageCompleted(message) => {
                if let Some(observer) = &self.inner.observer {
                    observer.on_message_completed(&message);
                }
            }
            Applied::Passthrough => {
                if let Some(observer) = &self.inner.observer {
                    observer.on_passthrough(event);
                }
            }
            Applied::Errored(err) => {
                warn!(message = %err.message, code = ?err.code, "agent reported run error");
                self.inner.notify_error(&err.message);
            }
            Applied::Continue | Applied::Finished => {}
        }
        outcome
    }

    fn fail(&self, generation: u64, err: &ClientError) -> SendOutcome {
        let mut state = self.inner.lock();
        if state.generation != generation {
            return SendOutcome::Superseded;
        }
        let message = err.user_message();
        warn!(error = %err, run_id = ?state.conversation.run_id(), "agent stream failed");
        state.end_run();
        state.error = Some(message.clone());
        self.inner.publish(state);
        self.inner.notify_error(&message);
        SendOutcome::Errored(message)
    }

    fn close(&self, generation: u64) -> SendOutcome {
        let mut state = self.inner.lock();
        if state.generation != generation {
            return SendOutcome::Superseded;
        }
        if !state.conversation.tracker().phase().is_terminal() {
            warn!(run_id = ?state.conversation.run_id(), "agent stream closed without a terminal event");
        }
        state.end_run();
        self.inner.publish(state);
        SendOutcome::Closed
    }
}

/// Builder for [`ChatSession`].
#[derive(Default)]
pub struct ChatSessionBuilder {
    transport: Option<Arc<dyn EventTransport>>,
    observer: Option<Arc<dyn SessionObserver>>,
    thread_id: Option<String>,
    history: Vec<Message>,
}

impl ChatSessionBuilder {
    /// Sets the transport that opens each run's response stream.
    pub fn transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Resumes an existing thread on the first send.
    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Seeds the conversation with earlier messages.
    pub fn history(mut self, messages: Vec<Message>) -> Self {
        self.history = messages;
        self
    }

    pub fn build(self) -> Result<ChatSession, ClientError> {
        let transport = self
            .transport
            .ok_or_else(|| ClientError::Config("a chat session needs a transport".into()))?;
        let mut conversation = match self.thread_id {
            Some(thread_id) => Conversation::with_thread(thread_id),
            None => Conversation::new(),
        };
        for message in self.history {
            conversation.push_message(message);
        }
        let state = SessionState {
            conversation,
            in_flight: false,
            is_streaming: false,
            error: None,
            generation: 0,
        };
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        Ok(ChatSession {
            inner: Arc::new(SessionInner {
                transport,
                observer: self.observer,
                state: Mutex::new(state),
                snapshot_tx,
            }),
        })
    }
}
