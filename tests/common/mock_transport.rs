// tests/common/mock_transport.rs
//! Mock ingestion transport that records batches in memory.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use trajectory_capture::learnings::LearningState;
use trajectory_capture::transport::{IngestResponse, IngestTransport, TransportError};
use trajectory_capture::{EventType, TrajectoryEvent};

/// A mock transport that stores every delivered batch.
#[derive(Clone, Default)]
pub struct MockTransport {
    batches: Arc<Mutex<Vec<Vec<TrajectoryEvent>>>>,
    failures_remaining: Arc<Mutex<usize>>,
    learnings: Arc<Mutex<Option<LearningState>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` ingest calls with a 503.
    pub async fn fail_next(&self, count: usize) {
        *self.failures_remaining.lock().await = count;
    }

    pub async fn set_learnings(&self, state: LearningState) {
        *self.learnings.lock().await = Some(state);
    }

    pub async fn batches(&self) -> Vec<Vec<TrajectoryEvent>> {
        self.batches.lock().await.clone()
    }

    pub async fn delivered(&self) -> Vec<TrajectoryEvent> {
        self.batches().await.into_iter().flatten().collect()
    }

    pub async fn delivered_types(&self) -> Vec<EventType> {
        self.delivered()
            .await
            .iter()
            .map(|event| event.event_type)
            .collect()
    }
}

#[async_trait]
impl IngestTransport for MockTransport {
    async fn ingest(&self, events: &[TrajectoryEvent]) -> Result<IngestResponse, TransportError> {
        {
            let mut remaining = self.failures_remaining.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Http {
                    status: 503,
                    message: "ingest unavailable".to_string(),
                });
            }
        }

        self.batches.lock().await.push(events.to_vec());
        Ok(IngestResponse {
            ingested: events.len(),
            warning: None,
        })
    }

    async fn get_learnings(&self, key: &str) -> Result<Option<LearningState>, TransportError> {
        if key.is_empty() {
            return Err(TransportError::Http {
                status: 400,
                message: "empty key".to_string(),
            });
        }
        Ok(self.learnings.lock().await.clone())
    }
}
