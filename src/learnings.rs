//! Learning state published by the remote service.
//!
//! A fetch failure is never an error for the caller: it degrades to "no
//! learnings available".

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transport::IngestTransport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningState {
    #[serde(default)]
    pub active: Vec<Learning>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl LearningState {
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

pub async fn fetch_learnings(transport: &dyn IngestTransport, key: &str) -> Option<LearningState> {
    match transport.get_learnings(key).await {
        Ok(Some(state)) => {
            debug!("fetched {} active learnings for {key}", state.active.len());
            Some(state)
        }
        Ok(None) => {
            debug!("no learnings stored for {key}");
            None
        }
        Err(error) => {
            warn!("learnings fetch for {key} failed, continuing without: {error}");
            None
        }
    }
}
