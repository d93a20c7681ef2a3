//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BatchConfig, CaptureConfig};
use crate::trajectory::{EventType, TrajectoryEvent};
use crate::transport::{IngestResponse, IngestTransport, TransportError};

/// Transport that records every delivered batch and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    batches: Arc<Mutex<Vec<Vec<TrajectoryEvent>>>>,
    fail_next: Arc<Mutex<usize>>,
    attempts: Arc<Mutex<usize>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject the next `count` ingest calls with a 503.
    pub fn fail_next(&self, count: usize) {
        *self.fail_next.lock().unwrap() = count;
    }

    pub fn batches(&self) -> Vec<Vec<TrajectoryEvent>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<TrajectoryEvent> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn delivered_types(&self) -> Vec<EventType> {
        self.delivered().iter().map(|event| event.event_type).collect()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl IngestTransport for RecordingTransport {
    async fn ingest(&self, events: &[TrajectoryEvent]) -> Result<IngestResponse, TransportError> {
        *self.attempts.lock().unwrap() += 1;
        {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(TransportError::Http {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
        }
        self.batches.lock().unwrap().push(events.to_vec());
        Ok(IngestResponse {
            ingested: events.len(),
            warning: None,
        })
    }
}

pub fn test_config() -> CaptureConfig {
    CaptureConfig {
        batch: BatchConfig {
            max_batch_size: 100,
            flush_interval_ms: 5_000,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Let spawned tasks on the current-thread test runtime make progress.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time past `duration` and let woken tasks run.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}
