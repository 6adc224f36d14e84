use serde::Serialize;
use tracing::debug;

use crate::event::AgentEvent;

/// Phase of the current run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    #[default]
    Idle,
    Running,
    Finished,
    Errored,
}

impl LifecyclePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }
}

/// Error reported by a `RUN_ERROR` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    pub message: String,
    pub code: Option<String>,
}

/// A sequencing rule the stream broke. Reported, never enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "issue",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum SequenceIssue {
    /// An event arrived before `RUN_STARTED`.
    BeforeRunStarted { kind: String },
    /// `RUN_STARTED` arrived while a run was already started or over.
    DuplicateRunStarted,
    /// An event arrived after the terminal event.
    AfterTerminal { kind: String },
    /// `STEP_FINISHED` for a step that is not the current one.
    UnmatchedStepFinished { step_name: String },
    /// The sequence ended without `RUN_FINISHED` or `RUN_ERROR`.
    MissingTerminal,
}

/// Tracks thread/run ids, steps and the terminal outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    phase: LifecyclePhase,
    thread_id: Option<String>,
    run_id: Option<String>,
    current_step: Option<String>,
    completed_steps: Vec<String>,
    error: Option<RunError>,
    issues: Vec<SequenceIssue>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    pub fn issues(&self) -> &[SequenceIssue] {
        &self.issues
    }

    /// Updates the lifecycle from one event. Every event is accepted.
    pub fn observe(&mut self, event: &AgentEvent) {
        if self.phase.is_terminal() {
            self.issues.push(SequenceIssue::AfterTerminal {
                kind: event.kind().to_string(),
            });
        } else if self.phase == LifecyclePhase::Idle
            && !matches!(event, AgentEvent::RunStarted { .. })
        {
            self.issues.push(SequenceIssue::BeforeRunStarted {
                kind: event.kind().to_string(),
            });
        }

        match event {
            AgentEvent::RunStarted {
                thread_id, run_id, ..
            } => {
                if self.phase != LifecyclePhase::Idle {
                    self.issues.push(SequenceIssue::DuplicateRunStarted);
                    return;
                }
                debug!(thread_id = %thread_id, run_id = %run_id, "run started");
                self.phase = LifecyclePhase::Running;
                self.thread_id = Some(thread_id.clone());
                self.run_id = Some(run_id.clone());
            }
            AgentEvent::StepStarted { step_name, .. } => {
                self.current_step = Some(step_name.clone());
            }
            AgentEvent::StepFinished { step_name, .. } => {
                if self.current_step.as_deref() == Some(step_name.as_str()) {
                    self.current_step = None;
                } else {
                    self.issues.push(SequenceIssue::UnmatchedStepFinished {
                        step_name: step_name.clone(),
                    });
                }
                self.completed_steps.push(step_name.clone());
            }
            AgentEvent::RunFinished {
                thread_id, run_id, ..
            } => {
                debug!(run_id = ?self.run_id, "run finished");
                self.phase = LifecyclePhase::Finished;
                if self.thread_id.is_none() {
                    self.thread_id = thread_id.clone();
                }
                if self.run_id.is_none() {
                    self.run_id = run_id.clone();
                }
            }
            AgentEvent::RunError { message, code, .. } => {
                debug!(run_id = ?self.run_id, message = %message, "run errored");
                self.phase = LifecyclePhase::Errored;
                self.error = Some(RunError {
                    message: message.clone(),
                    code: code.clone(),
                });
            }
            _ => {}
        }
    }
}

/// Checks a complete event sequence against the run lifecycle rules.
pub fn validate_sequence(events: &[AgentEvent]) -> Vec<SequenceIssue> {
    let mut tracker = RunTracker::new();
    for event in events {
        tracker.observe(event);
    }
    let mut issues = tracker.issues;
    if !tracker.phase.is_terminal() {
        issues.push(SequenceIssue::MissingTerminal);
    }
    issues
}
