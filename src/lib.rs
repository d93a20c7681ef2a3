//! Agent trajectory capture.
//!
//! Records what a running agent does (task boundaries, model calls, tool
//! calls, reasoning) as timestamped trajectory events and ships them in
//! batches to a remote ingestion service.
//!
//! # Architecture
//!
//! - `trajectory`: event types and the per-session trajectory store
//! - `capture`: the signal correlator, the streamed-text debouncer and the
//!   [`TrajectoryCapture`] context object that ties everything together
//! - `bus`: in-process agent signal bus and the batch buffer/flush scheduler
//! - `transport`: the ingestion seam and its HTTP client
//! - `learnings`: learning state published back by the service
//! - `config`: serde configuration with environment overrides

pub mod bus;
pub mod capture;
pub mod config;
pub mod error;
pub mod learnings;
pub mod trajectory;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;

use tokio::task::JoinHandle;

pub use bus::{AgentEventBus, AgentSignal, SignalStream};
pub use capture::{CaptureStats, TrajectoryCapture};
pub use config::{BatchConfig, CaptureConfig, DeliveryFailurePolicy, DoubleStartPolicy};
pub use error::CaptureError;
pub use learnings::{Learning, LearningState};
pub use trajectory::{
    EventType, TaskEndDetails, TaskStatus, Trajectory, TrajectoryEvent, TrajectoryOptions,
};
pub use transport::{HttpIngestClient, IngestClientConfig, IngestTransport, TransportError};

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Does nothing when the host already installed a global subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trajectory_capture=debug,info")),
        )
        .try_init();
}

/// Spawn a background task on the current tokio runtime.
///
/// Outside a runtime the task is dropped with a warning instead of panicking,
/// so recording from a synchronous host thread degrades to "not scheduled".
pub(crate) fn spawn_detached<F>(label: &str, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            tracing::warn!("no tokio runtime available, {label} not scheduled");
            None
        }
    }
}
