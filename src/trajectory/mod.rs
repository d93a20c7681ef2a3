//! Trajectories: one task execution per session, and the events it emits.

mod store;
mod types;

pub use store::TrajectoryStore;
pub use types::{
    AgentDefinitionPayload, EventPayload, EventType, LlmCallPayload, LogPayload, TaskEndDetails,
    TaskEndPayload, TaskStartPayload, TaskStatus, TokenUsage, ToolCallPayload, Trajectory,
    TrajectoryEvent, TrajectoryOptions,
};
