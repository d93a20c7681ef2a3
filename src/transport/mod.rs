//! Remote ingestion seam.
//!
//! The capture pipeline only ever talks to an [`IngestTransport`]. The
//! concrete [`HttpIngestClient`] owns the wire details and the retry policy;
//! tests plug in recording or failing transports instead.

pub mod error;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::learnings::LearningState;
use crate::trajectory::TrajectoryEvent;

pub use error::TransportError;
pub use http::{HttpIngestClient, IngestClientConfig};

/// Acknowledgement returned by the ingestion endpoint for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    #[serde(default)]
    pub ingested: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[async_trait]
pub trait IngestTransport: Send + Sync {
    /// Submit one ordered batch. Implementations fail on any non-2xx status.
    async fn ingest(&self, events: &[TrajectoryEvent]) -> Result<IngestResponse, TransportError>;

    /// Fetch the learning state stored under `key`. `Ok(None)` means the
    /// key is unknown to the service.
    async fn get_learnings(&self, key: &str) -> Result<Option<LearningState>, TransportError> {
        let _ = key;
        Ok(None)
    }
}
