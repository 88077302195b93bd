//! Subagent fan-out and event bubbling.
//!
//! When the model calls the `task` tool, the parent mints a task id,
//! builds a child agent with its own session and a scoped memory
//! namespace, and forwards every child event to its own bus wrapped as
//! [`AgentEvent::SubagentEvent`]. Nested children produce nested
//! wrappers, so observers see the whole tree flattened but identifiable
//! by task id.
//!
//! Identity invariant: a task id is unique for the parent's lifetime and
//! belongs to exactly one child; no wrapped event is forwarded without a
//! matching handle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::memory::MemoryManager;
use crate::tool::ToolDefinition;

use super::Agent;
use super::bus::EventBus;
use super::config::{AgentConfig, SubagentSpec};
use super::events::{AgentEvent, AgentStatus};

/// Status of a dispatched subagent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    /// The child task is in flight.
    Running,
    /// The child finished with a final message.
    Completed,
    /// The child failed.
    Failed,
    /// The child was aborted.
    Aborted,
}

/// Record of one dispatched subagent.
#[derive(Debug, Clone)]
pub struct SubagentHandle {
    /// Task id minted by the parent at dispatch.
    pub task_id: String,
    /// Registered subagent type name.
    pub subagent_type: String,
    /// The child agent's session id.
    pub child_session_id: String,
    /// Tool call id that triggered the dispatch.
    pub parent_call_id: String,
    /// Whether the child runs detached from the parent loop.
    pub run_in_background: bool,
    /// Current status.
    pub status: SubagentStatus,
}

/// Arguments of the `task` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct TaskArgs {
    /// Which registered subagent type to dispatch.
    subagent_type: String,
    /// The task prompt handed to the child.
    prompt: String,
    /// Detach the child and return immediately.
    #[serde(default)]
    run_in_background: bool,
}

/// Synchronous acknowledgment returned for background dispatches.
#[derive(Debug, Serialize)]
struct TaskAck<'a> {
    task_id: &'a str,
    child_session_id: &'a str,
    status: &'a str,
}

/// Routes `task` tool calls to child agents and bubbles their events.
pub(crate) struct SubagentRouter {
    specs: Vec<SubagentSpec>,
    template: AgentConfig,
    parent_bus: Arc<EventBus>,
    parent_memory: Arc<dyn MemoryManager>,
    handles: Arc<Mutex<HashMap<String, SubagentHandle>>>,
    children: Mutex<Vec<Arc<Agent>>>,
}

impl SubagentRouter {
    pub(crate) fn new(
        template: AgentConfig,
        parent_bus: Arc<EventBus>,
        parent_memory: Arc<dyn MemoryManager>,
    ) -> Self {
        Self {
            specs: template.subagents.clone(),
            template,
            parent_bus,
            parent_memory,
            handles: Arc::new(Mutex::new(HashMap::new())),
            children: Mutex::new(Vec::new()),
        }
    }

    /// The `task` tool definition advertised to the model.
    pub(crate) fn tool_definition(&self) -> ToolDefinition {
        let types: Vec<String> = self
            .specs
            .iter()
            .map(|s| format!("{}: {}", s.name, s.description))
            .collect();
        let mut definition = ToolDefinition::from_schema::<TaskArgs>(
            "task",
            format!(
                "Dispatch a task to a specialized subagent. Available types — {}",
                types.join("; ")
            ),
        );
        // Constrain the type field to the registered names.
        if let Some(props) = definition
            .parameters
            .get_mut("properties")
            .and_then(|p| p.get_mut("subagent_type"))
            && let Some(obj) = props.as_object_mut()
        {
            obj.insert(
                "enum".to_owned(),
                serde_json::json!(
                    self.specs.iter().map(|s| s.name.clone()).collect::<Vec<_>>()
                ),
            );
        }
        definition
    }

    /// Snapshot of all handles.
    pub(crate) fn handles(&self) -> Vec<SubagentHandle> {
        self.handles
            .lock()
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Propagates an abort to every live child.
    pub(crate) fn abort_all(&self) {
        if let Ok(children) = self.children.lock() {
            for child in children.iter() {
                child.abort();
            }
        }
    }

    /// Dispatches one `task` tool call. Returns `(payload, success)` in
    /// the dispatcher's tool-result convention.
    pub(crate) async fn dispatch(&self, call_id: &str, arguments: &str) -> (String, bool) {
        let args: TaskArgs = match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(e) => return (format!("invalid task arguments: {e}"), false),
        };

        let Some(spec) = self.specs.iter().find(|s| s.name == args.subagent_type) else {
            let known: Vec<&str> = self.specs.iter().map(|s| s.name.as_str()).collect();
            return (
                format!(
                    "unknown subagent type '{}'; registered types: {}",
                    args.subagent_type,
                    known.join(", ")
                ),
                false,
            );
        };

        let task_id = format!("task_{}", Uuid::new_v4().simple());
        let child = self.build_child(spec, &task_id);
        let child_session_id = child.session_id();

        self.register(&child, SubagentHandle {
            task_id: task_id.clone(),
            subagent_type: spec.name.clone(),
            child_session_id: child_session_id.clone(),
            parent_call_id: call_id.to_owned(),
            run_in_background: args.run_in_background,
            status: SubagentStatus::Running,
        });

        info!(
            task_id = %task_id,
            subagent_type = %spec.name,
            background = args.run_in_background,
            "Dispatching subagent",
        );

        if args.run_in_background {
            let handles = Arc::clone(&self.handles);
            let spawned_id = task_id.clone();
            let runner = Arc::clone(&child);
            tokio::spawn(async move {
                let report = run_child(runner, args.prompt).await;
                set_status(&handles, &spawned_id, status_of(report.status));
            });
            let ack = TaskAck {
                task_id: &task_id,
                child_session_id: &child_session_id,
                status: "started",
            };
            let payload = serde_json::to_string(&ack)
                .unwrap_or_else(|_| format!(r#"{{"task_id":"{task_id}","status":"started"}}"#));
            (payload, true)
        } else {
            let report = run_child(Arc::clone(&child), args.prompt).await;
            set_status(&self.handles, &task_id, status_of(report.status));
            match report.status {
                AgentStatus::Completed => {
                    let text = report
                        .final_message
                        .map(|m| m.text())
                        .unwrap_or_default();
                    (text, true)
                }
                _ => {
                    let detail = report
                        .failure
                        .map_or_else(|| "subagent failed".to_owned(), |f| f.user_message);
                    warn!(task_id = %task_id, "Subagent did not complete: {detail}");
                    (format!("subagent '{}' failed: {detail}", spec.name), false)
                }
            }
        }
    }

    /// Builds the child agent and wires its events into the parent bus.
    fn build_child(&self, spec: &SubagentSpec, task_id: &str) -> Arc<Agent> {
        let mut config = self.template.clone();
        config.system_prompt = Some(spec.system_prompt.clone());
        config.session_id = None;
        config.stream_callback = None;
        config.memory_manager = Some(self.parent_memory.scoped(task_id));
        // Children inherit the parent's subagent catalog, producing
        // nested wrappers for nested dispatches.
        let child = Arc::new(Agent::new(config));

        let parent_bus = Arc::clone(&self.parent_bus);
        let task_id = task_id.to_owned();
        let subagent_type = spec.name.clone();
        let child_session_id = child.session_id();
        child.bus().on_any(Arc::new(move |event| {
            parent_bus.emit(&AgentEvent::SubagentEvent {
                task_id: task_id.clone(),
                subagent_type: subagent_type.clone(),
                child_session_id: child_session_id.clone(),
                event: Box::new(event.clone()),
            });
        }));

        child
    }

    fn register(&self, child: &Arc<Agent>, handle: SubagentHandle) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.insert(handle.task_id.clone(), handle);
        }
        if let Ok(mut children) = self.children.lock() {
            children.push(Arc::clone(child));
        }
    }
}

impl std::fmt::Debug for SubagentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentRouter")
            .field("specs", &self.specs.len())
            .finish_non_exhaustive()
    }
}

/// Boxed child run, breaking the recursive future type between parent
/// and child execution.
fn run_child(
    child: Arc<Agent>,
    prompt: String,
) -> Pin<Box<dyn Future<Output = super::ExecutionReport> + Send>> {
    Box::pin(async move { child.execute_with_result(prompt).await })
}

const fn status_of(status: AgentStatus) -> SubagentStatus {
    match status {
        AgentStatus::Completed => SubagentStatus::Completed,
        AgentStatus::Aborted => SubagentStatus::Aborted,
        _ => SubagentStatus::Failed,
    }
}

fn set_status(
    handles: &Arc<Mutex<HashMap<String, SubagentHandle>>>,
    task_id: &str,
    status: SubagentStatus,
) {
    if let Ok(mut handles) = handles.lock()
        && let Some(handle) = handles.get_mut(task_id)
    {
        handle.status = status;
    }
}
