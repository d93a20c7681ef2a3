use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::spawn_detached;
use crate::trajectory::{LlmCallPayload, TrajectoryStore};

/// Model metadata that travels with a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInfo {
    pub model: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug)]
struct PendingText {
    text: String,
    info: ModelInfo,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Coalesces streamed assistant text into one settled `llm_call` per
/// response.
///
/// Per session it keeps the latest fragment and restarts a settle timer on
/// every accepted fragment. A fragment that the pending text already starts
/// with is a stale delta and is discarded without touching the timer.
#[derive(Clone)]
pub struct LlmDebouncer {
    inner: Arc<DebouncerInner>,
}

struct DebouncerInner {
    store: Arc<TrajectoryStore>,
    settle: Duration,
    pending: Mutex<HashMap<String, PendingText>>,
    generation: AtomicU64,
}

impl LlmDebouncer {
    pub fn new(store: Arc<TrajectoryStore>, settle: Duration) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                store,
                settle,
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Offer a text fragment. Returns false when it was discarded.
    pub fn push(&self, session_key: &str, text: &str, info: ModelInfo) -> bool {
        if text.is_empty() {
            return false;
        }

        let mut pending = self.inner.pending();
        if let Some(existing) = pending.get(session_key) {
            if existing.text.starts_with(text) {
                tracing::trace!("discarding stale text delta for session {session_key}");
                return false;
            }
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let timer = self.spawn_settle_timer(session_key.to_string(), generation);
        let entry = PendingText {
            text: text.to_string(),
            info,
            generation,
            timer,
        };
        if let Some(previous) = pending.insert(session_key.to_string(), entry) {
            if let Some(handle) = previous.timer {
                handle.abort();
            }
        }
        true
    }

    /// Emit the session's pending text now, if any.
    pub fn flush(&self, session_key: &str) -> bool {
        let entry = self.inner.pending().remove(session_key);
        match entry {
            Some(entry) => {
                if let Some(handle) = &entry.timer {
                    handle.abort();
                }
                self.inner.emit(session_key, entry);
                true
            }
            None => false,
        }
    }

    /// Abort every timer and drop all pending text without emitting it.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingText> = self.inner.pending().drain().map(|(_, v)| v).collect();
        for entry in &drained {
            if let Some(handle) = &entry.timer {
                handle.abort();
            }
        }
        drained.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn pending_text(&self, session_key: &str) -> Option<String> {
        self.inner
            .pending()
            .get(session_key)
            .map(|entry| entry.text.clone())
    }

    fn spawn_settle_timer(&self, session_key: String, generation: u64) -> Option<JoinHandle<()>> {
        let inner = self.inner.clone();
        spawn_detached("debounce timer", async move {
            time::sleep(inner.settle).await;
            inner.settle(&session_key, generation);
        })
    }
}

impl DebouncerInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingText>> {
        self.pending.lock().expect("debouncer mutex poisoned")
    }

    fn settle(&self, session_key: &str, generation: u64) {
        let entry = {
            let mut pending = self.pending();
            match pending.get(session_key) {
                Some(entry) if entry.generation == generation => pending.remove(session_key),
                // A newer fragment re-armed the timer after this one woke.
                _ => None,
            }
        };
        if let Some(entry) = entry {
            self.emit(session_key, entry);
        }
    }

    fn emit(&self, session_key: &str, entry: PendingText) {
        let recorded = self.store.log_event(
            session_key,
            LlmCallPayload {
                model: entry.info.model,
                provider: entry.info.provider,
                response: Some(entry.text),
                ..Default::default()
            },
        );
        if !recorded {
            tracing::trace!("settled text for session {session_key} had no trajectory");
        }
    }
}
