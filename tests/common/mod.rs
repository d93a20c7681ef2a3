// tests/common/mod.rs
//! Common test utilities for capture integration tests.

pub mod mock_transport;

use std::time::Duration;

pub use mock_transport::MockTransport;

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
