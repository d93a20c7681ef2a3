use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 1024;

/// Named stream a raw agent signal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStream {
    Tool,
    Assistant,
    Lifecycle,
    #[serde(other)]
    Other,
}

/// Raw instrumentation signal emitted by a running agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSignal {
    pub run_id: String,
    pub stream: SignalStream,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default)]
    pub seq: i64,
}

/// In-process broadcast source of agent signals.
pub struct AgentEventBus {
    tx: broadcast::Sender<AgentSignal>,
    seq: AtomicI64,
}

impl Default for AgentEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            seq: AtomicI64::new(0),
        }
    }

    /// Publish a pre-built signal onto the bus.
    pub fn publish(&self, signal: AgentSignal) {
        if let Err(e) = self.tx.send(signal) {
            tracing::trace!("agent signal dropped (no listeners): {e}");
        }
    }

    /// Convenience: build and publish a signal in one call.
    pub fn emit(
        &self,
        run_id: impl Into<String>,
        stream: SignalStream,
        session_key: Option<String>,
        data: serde_json::Value,
    ) -> AgentSignal {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let signal = AgentSignal {
            run_id: run_id.into(),
            stream,
            data,
            session_key,
            seq,
        };
        self.publish(signal.clone());
        signal
    }

    /// Get a new receiver for this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentSignal> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
