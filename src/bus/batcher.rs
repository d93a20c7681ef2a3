use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio::time;

use crate::config::{BatchConfig, DeliveryFailurePolicy};
use crate::spawn_detached;
use crate::trajectory::TrajectoryEvent;
use crate::transport::{IngestTransport, TransportError};

/// Buffers trajectory events and ships them to the ingest transport.
///
/// - An enqueue arms a one-shot flush timer (`flush_interval_ms`) if none is
///   pending.
/// - Reaching `max_batch_size` flushes immediately, regardless of the timer.
/// - A flush swaps the buffer out before sending, so events enqueued while a
///   batch is in flight start a fresh buffer.
#[derive(Clone)]
pub struct EventBatcher {
    inner: Arc<BatcherInner>,
}

struct BatcherInner {
    transport: Arc<dyn IngestTransport>,
    config: BatchConfig,
    buffer: Mutex<Vec<TrajectoryEvent>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl EventBatcher {
    pub fn new(transport: Arc<dyn IngestTransport>, config: BatchConfig) -> Self {
        let capacity = config.max_batch_size.min(1024);
        Self {
            inner: Arc::new(BatcherInner {
                transport,
                config,
                buffer: Mutex::new(Vec::with_capacity(capacity)),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn enqueue(&self, event: TrajectoryEvent) {
        let len = {
            let mut buffer = self.buffer();
            buffer.push(event);
            buffer.len()
        };

        self.ensure_timer();

        if len >= self.inner.config.max_batch_size {
            let batcher = self.clone();
            spawn_detached("size-triggered flush", async move {
                batcher.flush().await;
            });
        }
    }

    /// Cancel any pending timer and deliver everything buffered so far.
    pub async fn flush(&self) {
        self.cancel_timer();
        self.deliver().await;
    }

    /// Abort the pending flush timer without delivering.
    pub fn cancel_timer(&self) {
        if let Some(handle) = self.timer().take() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    pub fn has_pending_timer(&self) -> bool {
        self.timer()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn ensure_timer(&self) {
        let mut timer = self.timer();
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let batcher = self.clone();
        let interval = self.inner.config.flush_interval();
        *timer = spawn_detached("flush timer", async move {
            time::sleep(interval).await;
            // Release the slot first: the timer must not abort itself.
            batcher.timer().take();
            batcher.deliver().await;
        });
    }

    async fn deliver(&self) {
        let batch = std::mem::take(&mut *self.buffer());
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        match self.inner.transport.ingest(&batch).await {
            Ok(response) => {
                tracing::debug!(
                    "flushed {count} trajectory events (ingested {})",
                    response.ingested
                );
            }
            Err(error) => self.handle_failure(batch, error),
        }
    }

    fn handle_failure(&self, batch: Vec<TrajectoryEvent>, error: TransportError) {
        match self.inner.config.on_failure {
            DeliveryFailurePolicy::Drop => {
                tracing::warn!("dropping {} trajectory events: {error}", batch.len());
            }
            DeliveryFailurePolicy::Requeue { max_buffered } => {
                let dropped = {
                    let mut buffer = self.buffer();
                    let mut merged = batch;
                    merged.append(&mut buffer);
                    let overflow = merged.len().saturating_sub(max_buffered);
                    merged.drain(..overflow);
                    *buffer = merged;
                    overflow
                };
                if dropped > 0 {
                    tracing::warn!(
                        "ingest failed ({error}); requeued batch, dropped {dropped} oldest events"
                    );
                } else {
                    tracing::warn!("ingest failed ({error}); batch requeued");
                }
                self.ensure_timer();
            }
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<TrajectoryEvent>> {
        self.inner.buffer.lock().expect("event buffer mutex poisoned")
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.timer.lock().expect("flush timer mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{advance, settle, RecordingTransport};
    use crate::trajectory::{LogPayload, Trajectory};

    fn batcher_with(transport: Arc<RecordingTransport>, config: BatchConfig) -> EventBatcher {
        EventBatcher::new(transport, config)
    }

    fn log_event(trajectory: &Trajectory, message: &str) -> TrajectoryEvent {
        trajectory.new_event(
            LogPayload {
                level: "info".to_string(),
                message: message.to_string(),
                data: None,
            }
            .into(),
        )
    }

    fn config(max_batch_size: usize) -> BatchConfig {
        BatchConfig {
            max_batch_size,
            flush_interval_ms: 5_000,
            on_failure: DeliveryFailurePolicy::Drop,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn below_threshold_waits_for_timer() {
        let transport = RecordingTransport::new();
        let batcher = batcher_with(transport.clone(), config(100));
        let trajectory = Trajectory::new("s1", "main".to_string(), None);

        batcher.enqueue(log_event(&trajectory, "one"));
        batcher.enqueue(log_event(&trajectory, "two"));
        settle().await;
        assert!(transport.batches().is_empty());
        assert!(batcher.has_pending_timer());

        advance(Duration::from_millis(4_900)).await;
        assert!(transport.batches().is_empty());

        advance(Duration::from_millis(200)).await;
        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batcher.is_empty());
        assert!(!batcher.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_max_size_flushes_without_timer() {
        let transport = RecordingTransport::new();
        let batcher = batcher_with(transport.clone(), config(3));
        let trajectory = Trajectory::new("s1", "main".to_string(), None);

        for message in ["a", "b", "c"] {
            batcher.enqueue(log_event(&trajectory, message));
        }
        settle().await;

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert!(!batcher.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_preserves_fifo_order_and_is_idempotent() {
        let transport = RecordingTransport::new();
        let batcher = batcher_with(transport.clone(), config(100));
        let trajectory = Trajectory::new("s1", "main".to_string(), None);

        let events: Vec<TrajectoryEvent> =
            (0..5).map(|i| log_event(&trajectory, &i.to_string())).collect();
        for event in &events {
            batcher.enqueue(event.clone());
        }

        batcher.flush().await;
        batcher.flush().await;

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], events);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_dropped_by_default() {
        let transport = RecordingTransport::new();
        transport.fail_next(1);
        let batcher = batcher_with(transport.clone(), config(100));
        let trajectory = Trajectory::new("s1", "main".to_string(), None);

        batcher.enqueue(log_event(&trajectory, "lost"));
        batcher.flush().await;
        assert!(batcher.is_empty());

        batcher.enqueue(log_event(&trajectory, "kept"));
        batcher.flush().await;

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_policy_puts_batch_back_in_front() {
        let transport = RecordingTransport::new();
        transport.fail_next(1);
        let batcher = batcher_with(
            transport.clone(),
            BatchConfig {
                on_failure: DeliveryFailurePolicy::Requeue { max_buffered: 3 },
                ..config(100)
            },
        );
        let trajectory = Trajectory::new("s1", "main".to_string(), None);

        let first = log_event(&trajectory, "first");
        let second = log_event(&trajectory, "second");
        batcher.enqueue(first.clone());
        batcher.enqueue(second.clone());
        batcher.flush().await;

        assert_eq!(batcher.len(), 2);
        assert!(batcher.has_pending_timer());

        let third = log_event(&trajectory, "third");
        batcher.enqueue(third.clone());
        advance(Duration::from_millis(5_100)).await;

        assert_eq!(transport.delivered(), vec![first, second, third]);
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_policy_bounds_buffer() {
        let transport = RecordingTransport::new();
        transport.fail_next(1);
        let batcher = batcher_with(
            transport.clone(),
            BatchConfig {
                on_failure: DeliveryFailurePolicy::Requeue { max_buffered: 2 },
                ..config(100)
            },
        );
        let trajectory = Trajectory::new("s1", "main".to_string(), None);

        let events: Vec<TrajectoryEvent> =
            (0..3).map(|i| log_event(&trajectory, &i.to_string())).collect();
        for event in &events {
            batcher.enqueue(event.clone());
        }
        batcher.flush().await;
        assert_eq!(batcher.len(), 2);

        batcher.flush().await;
        assert_eq!(transport.delivered(), events[1..].to_vec());
    }
}
