use crate::action::Action;
use crate::api::{
    ApiError, Blob, Candidate, Content, FunctionCall, FunctionResponse, FunctionResponsePart, Part,
    ReasoningEngine, FINISH_STOP,
};
use crate::cdp::TargetId;
use crate::coords::VIRTUAL_MAX;
use crate::executor::ActionExecutor;
use crate::session::{Session, SessionError, SessionManager};
use crate::translate::{translate, TranslateError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

pub const DEFAULT_MAX_STEPS: u32 = 100;
pub const DEFAULT_STEP_PAUSE: Duration = Duration::from_millis(1000);

// coordinate-bearing function call arguments
const COORDINATE_ARGS: [&str; 4] = ["x", "y", "destination_x", "destination_y"];

const OPERATING_INSTRUCTIONS: &str = "You are a general-purpose browser agent. Your job is to accomplish the user's goal on a live browser page.
Today's date is {date}.

Reason step by step about what you see and decide on the next action.

* To act, state your reasoning and call one of the browser functions.
* To finish, return no function calls. Before doing so, state your final answer in your reasoning: it is reported back to the user. If the goal cannot be reached, say why.
* To scroll the page, prefer `scroll_document`. If it has no effect, use `scroll_at` with coordinates inside the element to scroll.";

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Reasoning engine error: {0}")]
    Engine(#[from] ApiError),
    #[error("A task is already running on target {0}")]
    AlreadyRunning(TargetId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The model stopped calling functions.
    Completed,
    /// The model stopped for a reason other than a normal end of turn.
    Halted { finish_reason: String },
    StepLimit,
    Cancelled,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Halted { .. } => "halted",
            TaskOutcome::StepLimit => "step_limit",
            TaskOutcome::Cancelled => "cancelled",
        }
    }

    fn fallback_summary(&self) -> String {
        match self {
            TaskOutcome::Completed => "Task completed successfully!".to_string(),
            TaskOutcome::Halted { finish_reason } => format!("Model stopped early: {finish_reason}"),
            TaskOutcome::StepLimit => "Reached maximum steps without completion".to_string(),
            TaskOutcome::Cancelled => "Task cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub outcome: TaskOutcome,
    pub steps: u32,
    pub summary: String,
    pub history: Vec<Content>,
}

/// Progress pushed to whoever is watching the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "update_type", rename_all = "snake_case")]
pub enum AgentUpdate {
    Started { target: TargetId, goal: String },
    Step { step: u32, max_steps: u32 },
    Thinking { message: String },
    Action { function: String, action: Action },
    Finished { outcome: TaskOutcome, summary: String },
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: u32,
    pub step_pause: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            step_pause: DEFAULT_STEP_PAUSE,
        }
    }
}

/// Per-target loop state. Lives only as long as one run.
#[derive(Debug, Clone)]
pub struct AgentSessionState {
    pub target: TargetId,
    pub history: Vec<Content>,
    pub step: u32,
}

impl AgentSessionState {
    pub fn new(target: TargetId, goal: &str) -> Self {
        let date = chrono::Local::now().format("%Y-%m-%d").to_string();
        let instructions = OPERATING_INSTRUCTIONS.replace("{date}", &date);
        Self {
            target,
            history: vec![
                Content::user_text(format!("System prompt: {instructions}")),
                Content::user_text(format!("I would like you to accomplish the following goal:\n\n{goal}")),
            ],
            step: 0,
        }
    }
}

/// One function call and what it translated to.
#[derive(Debug, Clone)]
pub struct PlannedCall {
    pub call: FunctionCall,
    pub actions: Result<Vec<Action>, TranslateError>,
}

#[derive(Debug, Clone)]
pub struct StepPlan {
    pub calls: Vec<PlannedCall>,
    pub message: String,
    /// Set when this step ends the task.
    pub outcome: Option<TaskOutcome>,
}

/// Pull the model's reasoning and translated calls out of a candidate.
pub fn plan_response(candidate: &Candidate) -> StepPlan {
    let mut calls = Vec::new();
    let mut message = Vec::new();

    for part in candidate.content.iter().flat_map(|c| &c.parts) {
        match part {
            Part::Text { text } => message.push(text.trim()),
            Part::FunctionCall { function_call } => calls.push(PlannedCall {
                call: function_call.clone(),
                actions: translate(function_call),
            }),
            _ => {}
        }
    }

    let outcome = match candidate.finish_reason.as_deref() {
        Some(reason) if reason != FINISH_STOP => Some(TaskOutcome::Halted {
            finish_reason: reason.to_string(),
        }),
        _ if calls.is_empty() => Some(TaskOutcome::Completed),
        _ => None,
    };

    StepPlan {
        calls,
        message: message.join("\n"),
        outcome,
    }
}

/// Pull coordinates the model placed past the edge back onto it.
pub fn clamp_call_coordinates(content: &mut Content) {
    for part in &mut content.parts {
        let Part::FunctionCall { function_call } = part else {
            continue;
        };
        for name in COORDINATE_ARGS {
            if let Some(value) = function_call.args.get_mut(name) {
                if value.as_f64().is_some_and(|v| v > VIRTUAL_MAX) {
                    *value = serde_json::Value::from(VIRTUAL_MAX as i64);
                }
            }
        }
    }
}

fn last_model_text(history: &[Content]) -> Option<String> {
    history
        .iter()
        .rev()
        .filter(|c| c.role == "model")
        .map(Content::text)
        .find(|t| !t.trim().is_empty())
}

fn function_response(
    name: &str,
    mut response: serde_json::Map<String, serde_json::Value>,
    errors: Vec<String>,
    parts: Vec<FunctionResponsePart>,
) -> Part {
    if !errors.is_empty() {
        response.insert("error".to_string(), errors.join("; ").into());
    }
    Part::FunctionResponse {
        function_response: FunctionResponse {
            name: name.to_string(),
            response: serde_json::Value::Object(response),
            parts,
        },
    }
}

pub struct Agent {
    engine: Arc<dyn ReasoningEngine>,
    sessions: Arc<SessionManager>,
    executor: ActionExecutor,
    config: AgentConfig,
    updates: Option<UnboundedSender<AgentUpdate>>,
}

impl Agent {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        sessions: Arc<SessionManager>,
        executor: ActionExecutor,
        config: AgentConfig,
    ) -> Self {
        Self {
            engine,
            sessions,
            executor,
            config,
            updates: None,
        }
    }

    pub fn with_updates(mut self, updates: UnboundedSender<AgentUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// Drive `target` toward `goal` until the model finishes, the step
    /// ceiling is hit or `cancel` is raised.
    ///
    /// The session is released on every path, including errors.
    pub async fn run(&self, target: &TargetId, goal: &str, cancel: &AtomicBool) -> Result<TaskReport, AgentError> {
        tracing::info!(%target, goal, "agent starting");

        let session = match self.sessions.attach_unless_cancelled(target, cancel).await {
            Ok(s) => s,
            Err(SessionError::Cancelled(_)) => {
                let state = AgentSessionState::new(target.clone(), goal);
                let outcome = TaskOutcome::Cancelled;
                let report = TaskReport {
                    summary: outcome.fallback_summary(),
                    outcome,
                    steps: 0,
                    history: state.history,
                };
                tracing::info!(%target, "agent cancelled before attaching");
                self.emit(AgentUpdate::Finished {
                    outcome: report.outcome.clone(),
                    summary: report.summary.clone(),
                });
                return Ok(report);
            }
            Err(e) => {
                self.emit(AgentUpdate::Error { message: e.to_string() });
                return Err(e.into());
            }
        };

        let result = self.drive(&session, goal, cancel).await;
        self.sessions.release(&session).await;

        match &result {
            Ok(report) => {
                tracing::info!(%target, outcome = report.outcome.as_str(), steps = report.steps, "agent finished");
                self.emit(AgentUpdate::Finished {
                    outcome: report.outcome.clone(),
                    summary: report.summary.clone(),
                });
            }
            Err(e) => {
                tracing::warn!(%target, error = %e, "agent failed");
                self.emit(AgentUpdate::Error { message: e.to_string() });
            }
        }
        result
    }

    async fn drive(&self, session: &Session, goal: &str, cancel: &AtomicBool) -> Result<TaskReport, AgentError> {
        let mut state = AgentSessionState::new(session.target().clone(), goal);
        self.emit(AgentUpdate::Started {
            target: state.target.clone(),
            goal: goal.to_string(),
        });

        let outcome = loop {
            if cancel.load(Ordering::SeqCst) {
                break TaskOutcome::Cancelled;
            }
            if state.step >= self.config.max_steps {
                break TaskOutcome::StepLimit;
            }

            tracing::info!(target = %state.target, "step {}/{}", state.step + 1, self.config.max_steps);
            self.emit(AgentUpdate::Step {
                step: state.step + 1,
                max_steps: self.config.max_steps,
            });

            let response = self.engine.generate(&state.history).await?;
            let Some(mut candidate) = response.candidates.into_iter().next() else {
                // nothing to do: treat as done
                state.step += 1;
                tokio::time::sleep(self.config.step_pause).await;
                break TaskOutcome::Completed;
            };

            if let Some(content) = candidate.content.as_mut() {
                clamp_call_coordinates(content);
                state.history.push(content.clone());
            }

            let plan = plan_response(&candidate);
            if !plan.message.is_empty() {
                tracing::debug!(message = %plan.message, "model reasoning");
                self.emit(AgentUpdate::Thinking {
                    message: plan.message.clone(),
                });
            }

            let mut responses = Vec::with_capacity(plan.calls.len());
            for planned in &plan.calls {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                responses.push(self.perform_call(session, planned, cancel).await);
            }
            if !responses.is_empty() {
                state.history.push(Content {
                    role: "user".to_string(),
                    parts: responses,
                });
            }

            state.step += 1;

            // pause after every iteration, the last one too, unless cancelled
            if cancel.load(Ordering::SeqCst) {
                break TaskOutcome::Cancelled;
            }
            tokio::time::sleep(self.config.step_pause).await;
            if let Some(outcome) = plan.outcome {
                break outcome;
            }
        };

        let summary = last_model_text(&state.history).unwrap_or_else(|| outcome.fallback_summary());
        Ok(TaskReport {
            outcome,
            steps: state.step,
            summary,
            history: state.history,
        })
    }

    /// Execute one call's actions, then answer it with a fresh screenshot.
    async fn perform_call(&self, session: &Session, planned: &PlannedCall, cancel: &AtomicBool) -> Part {
        let name = &planned.call.name;
        let mut errors = Vec::new();

        match &planned.actions {
            Ok(actions) => {
                for action in actions {
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    self.emit(AgentUpdate::Action {
                        function: name.clone(),
                        action: action.clone(),
                    });
                    let result = self.executor.execute(session, action).await;
                    if let Some(e) = result.error {
                        errors.push(format!("{}: {e}", action.kind()));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(function = %name, error = %e, "could not translate function call");
                errors.push(e.to_string());
            }
        }

        let mut response = serde_json::Map::new();
        let mut parts = Vec::new();
        if cancel.load(Ordering::SeqCst) {
            response.insert("url".to_string(), String::new().into());
            errors.push("task cancelled".to_string());
            return function_response(name, response, errors, parts);
        }
        match self.executor.screenshot(session).await {
            Ok(shot) => {
                response.insert("url".to_string(), shot.page_url.into());
                parts.push(FunctionResponsePart {
                    inline_data: Blob::png(shot.base64),
                });
            }
            Err(e) => {
                tracing::warn!(function = %name, error = %e, "screenshot failed");
                response.insert("url".to_string(), String::new().into());
                errors.push(format!("screenshot: {e}"));
            }
        }
        function_response(name, response, errors, parts)
    }

    fn emit(&self, update: AgentUpdate) {
        if let Some(tx) = &self.updates {
            // nobody listening is fine
            let _ = tx.send(update);
        }
    }
}
