use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::bus::event_types::{classify_tool_phase, releases_run, ToolPhase};
use crate::bus::{AgentEventBus, AgentSignal, SignalStream};
use crate::spawn_detached;
use crate::trajectory::{LlmCallPayload, ToolCallPayload, TrajectoryStore};

use super::debouncer::{LlmDebouncer, ModelInfo};
use super::signal::{parse_data, AssistantSignal, LifecycleSignal, ToolSignal};

#[derive(Debug)]
struct ToolSpan {
    run_id: String,
    started: Instant,
    input: Option<Value>,
}

/// Turns raw agent signals into trajectory events.
///
/// Signals are attributed to a session through the run→session map, which is
/// filled by any signal that carries a session key and purged when the run's
/// lifecycle ends. The correlator never starts a trajectory: signals for a
/// session without one are dropped, though a terminal tool phase still closes
/// its span. Open spans are also released with their run.
pub struct EventCorrelator {
    store: Arc<TrajectoryStore>,
    debouncer: LlmDebouncer,
    runs: DashMap<String, String>,
    spans: DashMap<String, ToolSpan>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl EventCorrelator {
    pub fn new(store: Arc<TrajectoryStore>, debouncer: LlmDebouncer) -> Self {
        Self {
            store,
            debouncer,
            runs: DashMap::new(),
            spans: DashMap::new(),
            listener: Mutex::new(None),
        }
    }

    pub fn debouncer(&self) -> &LlmDebouncer {
        &self.debouncer
    }

    pub fn tracked_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn open_spans(&self) -> usize {
        self.spans.len()
    }

    pub fn session_for_run(&self, run_id: &str) -> Option<String> {
        self.runs.get(run_id).map(|entry| entry.value().clone())
    }

    pub fn handle_signal(&self, signal: &AgentSignal) {
        let Some(session_key) = self.resolve_session(signal) else {
            trace!("dropping {:?} signal for unattributed run {}", signal.stream, signal.run_id);
            return;
        };

        if signal.stream == SignalStream::Lifecycle {
            self.on_lifecycle(signal);
            return;
        }

        let active = self.store.has_active(&session_key);
        match signal.stream {
            SignalStream::Tool => self.on_tool(&session_key, signal, active),
            SignalStream::Assistant if active => self.on_assistant(&session_key, signal),
            SignalStream::Assistant => {
                trace!("dropping signal for session {session_key} without active trajectory");
            }
            SignalStream::Lifecycle => {}
            SignalStream::Other => trace!("ignoring signal on unknown stream"),
        }
    }

    /// Subscribe to `bus` and feed every signal through [`Self::handle_signal`].
    /// Returns false when a listener is already running.
    pub fn start_listener(self: &Arc<Self>, bus: &AgentEventBus) -> bool {
        let mut listener = self.listener();
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("agent signal listener already running");
            return false;
        }

        let mut rx = bus.subscribe();
        let correlator = Arc::clone(self);
        *listener = spawn_detached("agent signal listener", async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => correlator.handle_signal(&signal),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("agent signal listener lagged, dropped {n} signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("agent signal bus closed, listener exiting");
                        break;
                    }
                }
            }
        });
        listener.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listener()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop listening and drop all correlation state, open tool spans and
    /// pending debounced text. Safe to call repeatedly or before starting.
    pub fn stop(&self) {
        if let Some(handle) = self.listener().take() {
            handle.abort();
        }
        let runs = self.runs.len();
        let spans = self.spans.len();
        self.runs.clear();
        self.spans.clear();
        let pending = self.debouncer.cancel_all();
        if runs + spans + pending > 0 {
            debug!("correlator stopped: dropped {runs} runs, {spans} tool spans, {pending} pending texts");
        }
    }

    fn resolve_session(&self, signal: &AgentSignal) -> Option<String> {
        match signal
            .session_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
        {
            Some(session_key) => {
                self.runs
                    .insert(signal.run_id.clone(), session_key.to_string());
                Some(session_key.to_string())
            }
            None => self.session_for_run(&signal.run_id),
        }
    }

    fn on_lifecycle(&self, signal: &AgentSignal) {
        let Some(lifecycle) = parse_data::<LifecycleSignal>(signal) else {
            return;
        };
        if !releases_run(&lifecycle.phase) {
            return;
        }
        if self.runs.remove(&signal.run_id).is_some() {
            trace!("released run {} ({})", signal.run_id, lifecycle.phase);
        }
        let before = self.spans.len();
        self.spans.retain(|_, span| span.run_id != signal.run_id);
        let dropped = before.saturating_sub(self.spans.len());
        if dropped > 0 {
            debug!("run {} ended with {dropped} open tool spans", signal.run_id);
        }
    }

    fn on_tool(&self, session_key: &str, signal: &AgentSignal, active: bool) {
        let Some(tool) = parse_data::<ToolSignal>(signal) else {
            return;
        };
        let (Some(name), Some(span_key)) = (tool.tool_name(), tool.span_key()) else {
            trace!("dropping tool signal without a name");
            return;
        };

        match classify_tool_phase(&tool.phase) {
            ToolPhase::Start if active => {
                self.spans.insert(
                    span_key,
                    ToolSpan {
                        run_id: signal.run_id.clone(),
                        started: Instant::now(),
                        input: tool.args.clone(),
                    },
                );
            }
            ToolPhase::Terminal { failed } => {
                let span = self.spans.remove(&span_key).map(|(_, span)| span);
                if !active {
                    trace!("tool {name} finished after session {session_key} ended");
                    return;
                }
                let duration_ms = span
                    .as_ref()
                    .map(|span| span.started.elapsed().as_millis() as u64);
                let input = span.and_then(|span| span.input).or(tool.args.clone());
                let failed = failed || tool.is_error;
                let error = failed.then(|| {
                    tool.error_message()
                        .unwrap_or_else(|| "tool call failed".to_string())
                });

                self.store.log_event(
                    session_key,
                    ToolCallPayload {
                        tool_name: name.to_string(),
                        tool_call_id: tool.tool_call_id.clone(),
                        input,
                        output: if failed { None } else { tool.result.clone() },
                        error,
                        duration_ms,
                    },
                );
            }
            ToolPhase::Start | ToolPhase::Update => {}
            ToolPhase::Unknown => trace!("ignoring tool phase '{}'", tool.phase),
        }
    }

    fn on_assistant(&self, session_key: &str, signal: &AgentSignal) {
        let Some(assistant) = parse_data::<AssistantSignal>(signal) else {
            return;
        };

        if let Some(usage) = assistant.billable_usage() {
            self.store.log_event(
                session_key,
                LlmCallPayload {
                    model: assistant.model,
                    provider: assistant.provider,
                    usage: Some(usage),
                    ..Default::default()
                },
            );
            return;
        }

        match (assistant.text(), assistant.reasoning()) {
            (Some(text), _) => {
                self.debouncer.push(
                    session_key,
                    text,
                    ModelInfo {
                        model: assistant.model.clone(),
                        provider: assistant.provider.clone(),
                    },
                );
            }
            (None, Some(reasoning)) => {
                self.store.log_event(
                    session_key,
                    LlmCallPayload {
                        model: assistant.model.clone(),
                        provider: assistant.provider.clone(),
                        reasoning: Some(reasoning.to_string()),
                        ..Default::default()
                    },
                );
            }
            (None, None) => {}
        }
    }

    fn listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().expect("listener mutex poisoned")
    }
}
