// tests/capture_integration_test.rs
//! End-to-end tests of the capture pipeline through its public API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use httpmock::Method::POST;
use httpmock::MockServer;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{advance, settle, MockTransport};
use trajectory_capture::learnings::{Learning, LearningState};
use trajectory_capture::{
    AgentEventBus, BatchConfig, CaptureConfig, DeliveryFailurePolicy, EventType,
    IngestClientConfig, SignalStream, TaskEndDetails, TaskStatus, TrajectoryCapture,
    TrajectoryOptions,
};

fn config() -> CaptureConfig {
    CaptureConfig {
        batch: BatchConfig {
            max_batch_size: 100,
            flush_interval_ms: 5_000,
            on_failure: DeliveryFailurePolicy::Drop,
        },
        ..Default::default()
    }
}

fn session(key: &str) -> Option<String> {
    Some(key.to_string())
}

#[tokio::test(start_paused = true)]
async fn agent_run_over_bus_is_captured_in_order() {
    let transport = MockTransport::new();
    let capture = TrajectoryCapture::new(config(), transport.clone()).expect("capture");
    let bus = AgentEventBus::new();
    capture.start_event_listener(&bus);

    capture
        .start_trajectory(
            "chat-7",
            "summarize the thread",
            TrajectoryOptions {
                channel: Some("slack".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("start");

    bus.emit("run-a", SignalStream::Lifecycle, session("chat-7"), json!({ "phase": "start" }));
    bus.emit("run-a", SignalStream::Assistant, None, json!({ "reasoning": "read first" }));
    for text in ["Sum", "Summary:", "Summary: all good"] {
        bus.emit("run-a", SignalStream::Assistant, None, json!({ "text": text }));
    }
    bus.emit(
        "run-a",
        SignalStream::Tool,
        None,
        json!({ "phase": "start", "name": "read_thread", "toolCallId": "t1", "args": { "id": 7 } }),
    );
    settle().await;

    advance(Duration::from_millis(50)).await;
    bus.emit(
        "run-a",
        SignalStream::Tool,
        None,
        json!({ "phase": "result", "name": "read_thread", "toolCallId": "t1", "result": { "messages": 12 } }),
    );
    bus.emit(
        "run-a",
        SignalStream::Assistant,
        None,
        json!({ "usage": { "input": 800, "output": 40 }, "model": "m", "provider": "p" }),
    );
    bus.emit("run-a", SignalStream::Lifecycle, None, json!({ "phase": "end" }));
    settle().await;
    assert_eq!(capture.stats().tracked_runs, 0);

    capture
        .end_trajectory(
            "chat-7",
            TaskStatus::Success,
            TaskEndDetails {
                final_answer: Some("Summary: all good".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("end");

    let delivered = transport.delivered().await;
    assert_eq!(
        delivered.iter().map(|e| e.event_type).collect::<Vec<_>>(),
        vec![
            EventType::TaskStart,
            EventType::LlmCall,
            EventType::ToolCall,
            EventType::LlmCall,
            EventType::LlmCall,
            EventType::TaskEnd,
        ]
    );
    let run_id = &delivered[0].run_id;
    assert!(delivered.iter().all(|event| &event.run_id == run_id));
    assert_eq!(
        delivered[4].as_llm_call().and_then(|p| p.response.clone()).as_deref(),
        Some("Summary: all good")
    );
    let end = delivered[5].as_task_end().expect("task_end");
    assert_eq!(end.event_count, 5);
    assert_eq!(end.duration_ms, 50);
}

#[tokio::test(start_paused = true)]
async fn signals_after_end_are_dropped() {
    let transport = MockTransport::new();
    let capture = TrajectoryCapture::new(config(), transport.clone()).expect("capture");
    let bus = AgentEventBus::new();
    capture.start_event_listener(&bus);

    capture
        .start_trajectory("s1", "quick", TrajectoryOptions::default())
        .await;
    capture
        .end_trajectory("s1", TaskStatus::Success, TaskEndDetails::default())
        .await;

    bus.emit(
        "run-late",
        SignalStream::Tool,
        session("s1"),
        json!({ "phase": "result", "name": "search" }),
    );
    settle().await;

    assert_eq!(capture.stats().buffered_events, 0);
    assert_eq!(
        transport.delivered_types().await,
        vec![EventType::TaskStart, EventType::TaskEnd]
    );
}

#[tokio::test(start_paused = true)]
async fn interleaved_sessions_share_size_triggered_batches() {
    let transport = MockTransport::new();
    let mut config = config();
    config.batch.max_batch_size = 3;
    let capture = TrajectoryCapture::new(config, transport.clone()).expect("capture");

    capture.start_trajectory("a", "task a", TrajectoryOptions::default()).await;
    capture.start_trajectory("b", "task b", TrajectoryOptions::default()).await;
    capture.log_message("a", "info", "a working", None);
    settle().await;

    let batches = transport.batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
    assert_eq!(capture.stats().active_trajectories, 2);

    let a = capture.trajectory("a").expect("a active");
    let b = capture.trajectory("b").expect("b active");
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(batches[0][2].run_id, a.run_id);
}

#[tokio::test(start_paused = true)]
async fn requeue_policy_recovers_from_transient_failure() {
    let transport = MockTransport::new();
    transport.fail_next(1).await;
    let mut config = config();
    config.batch.on_failure = DeliveryFailurePolicy::Requeue { max_buffered: 1_000 };
    let capture = TrajectoryCapture::new(config, transport.clone()).expect("capture");

    capture.start_trajectory("s1", "retry me", TrajectoryOptions::default()).await;
    capture
        .end_trajectory("s1", TaskStatus::Error, TaskEndDetails::default())
        .await;
    assert!(transport.batches().await.is_empty());
    assert_eq!(capture.stats().buffered_events, 2);

    advance(Duration::from_millis(5_100)).await;
    assert_eq!(
        transport.delivered_types().await,
        vec![EventType::TaskStart, EventType::TaskEnd]
    );
}

#[tokio::test(start_paused = true)]
async fn drop_policy_loses_failed_batch() {
    let transport = MockTransport::new();
    transport.fail_next(1).await;
    let capture = TrajectoryCapture::new(config(), transport.clone()).expect("capture");

    capture.start_trajectory("s1", "lossy", TrajectoryOptions::default()).await;
    capture
        .end_trajectory("s1", TaskStatus::Success, TaskEndDetails::default())
        .await;

    assert_eq!(capture.stats().buffered_events, 0);
    assert!(transport.batches().await.is_empty());
}

#[tokio::test]
async fn learnings_come_from_transport_and_failures_degrade() {
    let transport = MockTransport::new();
    transport
        .set_learnings(LearningState {
            active: vec![Learning {
                id: "l-1".to_string(),
                content: "ask before deleting files".to_string(),
                category: Some("safety".to_string()),
                confidence: Some(0.9),
            }],
            updated_at: Some("2026-10-01T12:00:00Z".to_string()),
        })
        .await;
    let capture = TrajectoryCapture::new(config(), transport).expect("capture");

    let state = capture.fetch_learnings("main").await.expect("learnings");
    assert_eq!(state.active[0].content, "ask before deleting files");
    assert!(capture.fetch_learnings("").await.is_none());
}

#[tokio::test]
async fn http_pipeline_posts_batch_on_end() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/events")
            .header("authorization", "Bearer integration-key")
            .body_contains("\"task_start\"")
            .body_contains("\"task_end\"");
        then.status(200).json_body(json!({ "ingested": 2 }));
    });

    let capture = TrajectoryCapture::with_http(CaptureConfig {
        ingest: IngestClientConfig {
            base_url: server.base_url(),
            api_key: Some("integration-key".to_string()),
            timeout_ms: 5_000,
            retry_count: 0,
        },
        ..config()
    })
    .expect("capture");

    capture
        .start_trajectory("s1", "over http", TrajectoryOptions::default())
        .await;
    capture
        .end_trajectory("s1", TaskStatus::Success, TaskEndDetails::default())
        .await;

    mock.assert();
    assert_eq!(capture.stats().buffered_events, 0);
}

#[test]
fn capture_requires_valid_endpoint() {
    let result = TrajectoryCapture::with_http(CaptureConfig {
        ingest: IngestClientConfig {
            base_url: "definitely not a url".to_string(),
            ..Default::default()
        },
        ..config()
    });
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn listener_can_be_restarted_after_stop() {
    let transport = MockTransport::new();
    let capture = TrajectoryCapture::new(config(), transport).expect("capture");
    let bus = Arc::new(AgentEventBus::new());

    assert!(capture.start_event_listener(&bus));
    capture.stop_event_listener();
    capture.stop_event_listener();
    settle().await;
    assert!(!capture.is_listening());

    assert!(capture.start_event_listener(&bus));
    assert!(capture.is_listening());
    capture.shutdown().await;
}
