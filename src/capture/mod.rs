//! The capture pipeline as one context object.
//!
//! [`TrajectoryCapture`] owns the trajectory store, the batch buffer, the
//! streamed-text debouncer and the signal correlator. Hosts create one per
//! process (tests create one per case) and call its operations directly or
//! attach it to an [`AgentEventBus`].

mod correlator;
mod debouncer;
pub mod signal;


use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::bus::{AgentEventBus, EventBatcher};
use crate::config::{CaptureConfig, DoubleStartPolicy};
use crate::error::CaptureError;
use crate::learnings::{self, LearningState};
use crate::trajectory::{
    AgentDefinitionPayload, LlmCallPayload, LogPayload, TaskEndDetails, TaskStatus,
    ToolCallPayload, Trajectory, TrajectoryEvent, TrajectoryOptions, TrajectoryStore,
};
use crate::transport::{HttpIngestClient, IngestTransport};

pub use correlator::EventCorrelator;
pub use debouncer::{LlmDebouncer, ModelInfo};

/// Point-in-time counts of the pipeline's in-memory state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub active_trajectories: usize,
    pub buffered_events: usize,
    pub pending_llm_texts: usize,
    pub tracked_runs: usize,
    pub open_tool_spans: usize,
}

pub struct TrajectoryCapture {
    config: CaptureConfig,
    transport: Arc<dyn IngestTransport>,
    store: Arc<TrajectoryStore>,
    correlator: Arc<EventCorrelator>,
}

impl TrajectoryCapture {
    pub fn new(
        config: CaptureConfig,
        transport: Arc<dyn IngestTransport>,
    ) -> Result<Self, CaptureError> {
        config.validate()?;

        let batcher = EventBatcher::new(transport.clone(), config.batch.clone());
        let store = Arc::new(TrajectoryStore::new(
            batcher,
            config.default_agent_id.clone(),
        ));
        let debouncer = LlmDebouncer::new(store.clone(), config.debounce());
        let correlator = Arc::new(EventCorrelator::new(store.clone(), debouncer));

        Ok(Self {
            config,
            transport,
            store,
            correlator,
        })
    }

    /// Build a pipeline that ships to the configured HTTP endpoint.
    pub fn with_http(config: CaptureConfig) -> Result<Self, CaptureError> {
        let client = HttpIngestClient::new(config.ingest.clone())?;
        Self::new(config, Arc::new(client))
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Begin a trajectory for `session_key`.
    ///
    /// When one is already active the configured [`DoubleStartPolicy`]
    /// decides: `Reject` keeps the existing one and returns `None`,
    /// `CloseExisting` ends it as cancelled first, `Overwrite` replaces it
    /// without a `task_end` after settling its pending text.
    pub async fn start_trajectory(
        &self,
        session_key: &str,
        task: &str,
        options: TrajectoryOptions,
    ) -> Option<Trajectory> {
        if self.store.has_active(session_key) {
            match self.config.double_start {
                DoubleStartPolicy::Reject => {
                    debug!("session {session_key} already has an active trajectory, ignoring start");
                    return None;
                }
                DoubleStartPolicy::CloseExisting => {
                    self.end_trajectory(
                        session_key,
                        TaskStatus::Cancelled,
                        TaskEndDetails {
                            error: Some("superseded by a new task".to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                }
                DoubleStartPolicy::Overwrite => {
                    // Settle streamed text into the abandoned trajectory, not
                    // the replacement.
                    self.correlator.debouncer().flush(session_key);
                }
            }
        }
        Some(self.store.start(session_key, task, options))
    }

    /// Settle any debounced text for the session, then close its trajectory
    /// and flush the buffer. Returns the `task_end` event, or `None` when
    /// nothing was active.
    pub async fn end_trajectory(
        &self,
        session_key: &str,
        status: TaskStatus,
        details: TaskEndDetails,
    ) -> Option<TrajectoryEvent> {
        self.correlator.debouncer().flush(session_key);
        self.store.end(session_key, status, details).await
    }

    pub fn log_llm_call(&self, session_key: &str, payload: LlmCallPayload) -> bool {
        self.store.log_event(session_key, payload)
    }

    pub fn log_tool_call(&self, session_key: &str, payload: ToolCallPayload) -> bool {
        self.store.log_event(session_key, payload)
    }

    pub fn log_agent_definition(&self, session_key: &str, payload: AgentDefinitionPayload) -> bool {
        self.store.log_event(session_key, payload)
    }

    pub fn log_message(
        &self,
        session_key: &str,
        level: &str,
        message: &str,
        data: Option<Value>,
    ) -> bool {
        self.store.log_event(
            session_key,
            LogPayload {
                level: level.to_string(),
                message: message.to_string(),
                data,
            },
        )
    }

    pub fn has_active_trajectory(&self, session_key: &str) -> bool {
        self.store.has_active(session_key)
    }

    /// Snapshot of the session's active trajectory.
    pub fn trajectory(&self, session_key: &str) -> Option<Trajectory> {
        self.store.get(session_key)
    }

    pub async fn flush_buffer(&self) {
        self.store.batcher().flush().await;
    }

    /// Emit the session's debounced text now instead of waiting for it to
    /// settle. Returns false when nothing was pending.
    pub fn flush_pending_llm_events(&self, session_key: &str) -> bool {
        self.correlator.debouncer().flush(session_key)
    }

    /// Returns false when a listener is already attached.
    pub fn start_event_listener(&self, bus: &AgentEventBus) -> bool {
        let started = self.correlator.start_listener(bus);
        if started {
            debug!("trajectory capture listening for agent signals");
        }
        started
    }

    pub fn stop_event_listener(&self) {
        self.correlator.stop();
    }

    pub fn is_listening(&self) -> bool {
        self.correlator.is_listening()
    }

    /// Detach from the bus, make a final delivery attempt and drop every
    /// trajectory. Debounced text that has not settled is discarded.
    pub async fn shutdown(&self) {
        self.stop_event_listener();
        self.flush_buffer().await;
        let abandoned = self.store.clear();
        info!("trajectory capture shut down ({abandoned} trajectories abandoned)");
    }

    pub async fn fetch_learnings(&self, key: &str) -> Option<LearningState> {
        learnings::fetch_learnings(self.transport.as_ref(), key).await
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            active_trajectories: self.store.active_count(),
            buffered_events: self.store.batcher().len(),
            pending_llm_texts: self.correlator.debouncer().pending_count(),
            tracked_runs: self.correlator.tracked_runs(),
            open_tool_spans: self.correlator.open_spans(),
        }
    }
}
