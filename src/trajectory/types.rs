use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event and status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskStart,
    TaskEnd,
    LlmCall,
    ToolCall,
    AgentDefinition,
    Log,
}

impl EventType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStart => "task_start",
            Self::TaskEnd => "task_end",
            Self::LlmCall => "llm_call",
            Self::ToolCall => "tool_call",
            Self::AgentDefinition => "agent_definition",
            Self::Log => "log",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" | "ok" | "completed" => Ok(Self::Success),
            "error" | "failed" => Ok(Self::Error),
            "cancelled" | "canceled" | "aborted" => Ok(Self::Cancelled),
            _ => Err(format!("unsupported task status: {value}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStartPayload {
    pub task: String,
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEndPayload {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub duration_ms: u64,
    /// Events recorded for the trajectory before this one.
    pub event_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmCallPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `None` when the start of the call was never observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinitionPayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Type-specific event body. The variant decides the event's `event_type`, so
/// the two can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    TaskStart(TaskStartPayload),
    TaskEnd(TaskEndPayload),
    LlmCall(LlmCallPayload),
    ToolCall(ToolCallPayload),
    AgentDefinition(AgentDefinitionPayload),
    Log(LogPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TaskStart(_) => EventType::TaskStart,
            Self::TaskEnd(_) => EventType::TaskEnd,
            Self::LlmCall(_) => EventType::LlmCall,
            Self::ToolCall(_) => EventType::ToolCall,
            Self::AgentDefinition(_) => EventType::AgentDefinition,
            Self::Log(_) => EventType::Log,
        }
    }
}

impl From<TaskStartPayload> for EventPayload {
    fn from(value: TaskStartPayload) -> Self {
        Self::TaskStart(value)
    }
}

impl From<TaskEndPayload> for EventPayload {
    fn from(value: TaskEndPayload) -> Self {
        Self::TaskEnd(value)
    }
}

impl From<LlmCallPayload> for EventPayload {
    fn from(value: LlmCallPayload) -> Self {
        Self::LlmCall(value)
    }
}

impl From<ToolCallPayload> for EventPayload {
    fn from(value: ToolCallPayload) -> Self {
        Self::ToolCall(value)
    }
}

impl From<AgentDefinitionPayload> for EventPayload {
    fn from(value: AgentDefinitionPayload) -> Self {
        Self::AgentDefinition(value)
    }
}

impl From<LogPayload> for EventPayload {
    fn from(value: LogPayload) -> Self {
        Self::Log(value)
    }
}

// ---------------------------------------------------------------------------
// Events and trajectories
// ---------------------------------------------------------------------------

/// One immutable occurrence within a trajectory, in the shape submitted to
/// the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryEvent {
    pub event_id: String,
    pub run_id: String,
    pub agent_id: String,
    pub parent_agent_id: Option<String>,
    pub invocation_id: String,
    pub task_id: String,
    pub event_type: EventType,
    pub payload: EventPayload,
    pub created_at: String,
}

impl TrajectoryEvent {
    pub fn as_tool_call(&self) -> Option<&ToolCallPayload> {
        match &self.payload {
            EventPayload::ToolCall(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_llm_call(&self) -> Option<&LlmCallPayload> {
        match &self.payload {
            EventPayload::LlmCall(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_task_end(&self) -> Option<&TaskEndPayload> {
        match &self.payload {
            EventPayload::TaskEnd(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Optional attributes supplied when a task starts.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryOptions {
    pub channel: Option<String>,
    pub agent_id: Option<String>,
    pub parent_agent_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Optional attributes supplied when a task ends.
#[derive(Debug, Clone, Default)]
pub struct TaskEndDetails {
    pub final_answer: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// One task execution scoped to a session.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub session_key: String,
    pub run_id: String,
    pub task_id: String,
    pub agent_id: String,
    pub parent_agent_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub events: Vec<TrajectoryEvent>,
    started: Instant,
}

impl Trajectory {
    pub(crate) fn new(session_key: &str, agent_id: String, parent_agent_id: Option<String>) -> Self {
        Self {
            session_key: session_key.to_string(),
            run_id: Uuid::now_v7().to_string(),
            task_id: Uuid::new_v4().to_string(),
            agent_id,
            parent_agent_id,
            started_at: Utc::now(),
            events: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn invocation_id(&self) -> String {
        format!("{}:{}", self.run_id, self.task_id)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Build an event owned by this trajectory. The caller decides whether
    /// to record and enqueue it.
    pub(crate) fn new_event(&self, payload: EventPayload) -> TrajectoryEvent {
        TrajectoryEvent {
            event_id: Uuid::new_v4().to_string(),
            run_id: self.run_id.clone(),
            agent_id: self.agent_id.clone(),
            parent_agent_id: self.parent_agent_id.clone(),
            invocation_id: self.invocation_id(),
            task_id: self.task_id.clone(),
            event_type: payload.event_type(),
            payload,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn event_serializes_to_wire_shape() {
        let trajectory = Trajectory::new("s1", "main".to_string(), None);
        let event = trajectory.new_event(
            ToolCallPayload {
                tool_name: "search".to_string(),
                input: Some(json!({ "q": "x" })),
                duration_ms: Some(50),
                ..Default::default()
            }
            .into(),
        );

        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["event_type"], "tool_call");
        assert_eq!(value["run_id"], trajectory.run_id.as_str());
        assert_eq!(value["parent_agent_id"], serde_json::Value::Null);
        assert_eq!(value["payload"]["tool_name"], "search");
        assert_eq!(value["payload"]["input"]["q"], "x");
        assert!(value["payload"].get("output").is_none());
        assert_eq!(
            value["invocation_id"],
            format!("{}:{}", trajectory.run_id, trajectory.task_id)
        );
        assert!(value["created_at"].as_str().unwrap_or_default().ends_with('Z'));
    }

    #[test]
    fn run_ids_are_unique() {
        let a = Trajectory::new("s1", "main".to_string(), None);
        let b = Trajectory::new("s1", "main".to_string(), None);
        assert_ne!(a.run_id, b.run_id);
        assert_ne!(a.task_id, b.task_id);
    }

    #[test]
    fn task_status_parses_aliases() {
        assert_eq!("canceled".parse::<TaskStatus>(), Ok(TaskStatus::Cancelled));
        assert_eq!(" Success ".parse::<TaskStatus>(), Ok(TaskStatus::Success));
        assert!("maybe".parse::<TaskStatus>().is_err());
    }
}
