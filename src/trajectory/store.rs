use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::bus::EventBatcher;

use super::types::{
    EventPayload, TaskEndDetails, TaskEndPayload, TaskStartPayload, TaskStatus, Trajectory,
    TrajectoryEvent, TrajectoryOptions,
};

/// Session key → active trajectory.
///
/// The store never guards against a second `start` for a live session: it
/// replaces the old trajectory without synthesizing a `task_end`. Callers
/// that care check [`TrajectoryStore::has_active`] first.
pub struct TrajectoryStore {
    active: Mutex<HashMap<String, Trajectory>>,
    batcher: EventBatcher,
    default_agent_id: String,
}

impl TrajectoryStore {
    pub fn new(batcher: EventBatcher, default_agent_id: impl Into<String>) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            batcher,
            default_agent_id: default_agent_id.into(),
        }
    }

    pub fn batcher(&self) -> &EventBatcher {
        &self.batcher
    }

    pub fn start(&self, session_key: &str, task: &str, options: TrajectoryOptions) -> Trajectory {
        let agent_id = options
            .agent_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.default_agent_id.clone());

        let mut trajectory = Trajectory::new(session_key, agent_id, options.parent_agent_id);
        let event = trajectory.new_event(
            TaskStartPayload {
                task: task.to_string(),
                session_key: session_key.to_string(),
                channel: options.channel,
                metadata: options.metadata,
            }
            .into(),
        );
        trajectory.events.push(event.clone());

        let previous = self
            .active()
            .insert(session_key.to_string(), trajectory.clone());
        if let Some(previous) = previous {
            warn!(
                "session {session_key} already had run {}; replaced without task_end",
                previous.run_id
            );
        }

        debug!(
            "trajectory started: session={session_key} run={} task={}",
            trajectory.run_id, trajectory.task_id
        );
        self.batcher.enqueue(event);
        trajectory
    }

    /// Close the session's trajectory with a `task_end` event and flush the
    /// buffer. Returns `None` when nothing was active.
    pub async fn end(
        &self,
        session_key: &str,
        status: TaskStatus,
        details: TaskEndDetails,
    ) -> Option<TrajectoryEvent> {
        let event = {
            let Some(trajectory) = self.active().remove(session_key) else {
                debug!("no active trajectory to end for session {session_key}");
                return None;
            };
            trajectory.new_event(
                TaskEndPayload {
                    status,
                    final_answer: details.final_answer,
                    error: details.error,
                    metadata: details.metadata,
                    duration_ms: trajectory.elapsed_ms(),
                    event_count: trajectory.events.len(),
                }
                .into(),
            )
        };

        debug!(
            "trajectory ended: session={session_key} run={} status={status}",
            event.run_id
        );
        self.batcher.enqueue(event.clone());
        self.batcher.flush().await;
        Some(event)
    }

    /// Record an event against the session's active trajectory. Events for
    /// sessions without one are dropped.
    pub fn log_event(&self, session_key: &str, payload: impl Into<EventPayload>) -> bool {
        let event = {
            let mut active = self.active();
            let Some(trajectory) = active.get_mut(session_key) else {
                tracing::trace!("dropping event for inactive session {session_key}");
                return false;
            };
            let event = trajectory.new_event(payload.into());
            trajectory.events.push(event.clone());
            event
        };
        self.batcher.enqueue(event);
        true
    }

    pub fn has_active(&self, session_key: &str) -> bool {
        self.active().contains_key(session_key)
    }

    pub fn get(&self, session_key: &str) -> Option<Trajectory> {
        self.active().get(session_key).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    /// Drop every trajectory without emitting `task_end`.
    pub fn clear(&self) -> usize {
        let mut active = self.active();
        let count = active.len();
        active.clear();
        count
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, Trajectory>> {
        self.active.lock().expect("trajectory store mutex poisoned")
    }
}
