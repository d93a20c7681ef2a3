use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use trajectory_capture::transport::IngestResponse;
use trajectory_capture::{
    AgentEventBus, AgentSignal, CaptureConfig, IngestTransport, TaskEndDetails, TaskStatus,
    TrajectoryCapture, TrajectoryEvent, TrajectoryOptions, TransportError,
};

/// Control records interleaved with agent signals in a replay log.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ControlRecord {
    #[serde(rename_all = "camelCase")]
    Start {
        session_key: String,
        task: String,
        #[serde(default)]
        agent_id: Option<String>,
        #[serde(default)]
        parent_agent_id: Option<String>,
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        metadata: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    End {
        session_key: String,
        #[serde(default = "default_status")]
        status: String,
        #[serde(default)]
        final_answer: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Wait {
        ms: u64,
    },
    Flush,
}

fn default_status() -> String {
    "success".to_string()
}

/// Prints each batch instead of sending it.
struct StdoutTransport;

#[async_trait]
impl IngestTransport for StdoutTransport {
    async fn ingest(&self, events: &[TrajectoryEvent]) -> Result<IngestResponse, TransportError> {
        let body = serde_json::to_string_pretty(&serde_json::json!({ "events": events }))
            .map_err(TransportError::from)?;
        println!("{body}");
        Ok(IngestResponse {
            ingested: events.len(),
            warning: None,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    trajectory_capture::init_tracing();
    if let Err(error) = run().await {
        eprintln!("trajectory replay failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let mut input: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut dry_run = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(());
        }

        if let Some(value) = arg.strip_prefix("--input=") {
            input = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--input" {
            let value = args
                .next()
                .ok_or_else(|| "--input requires a value".to_string())?;
            input = Some(PathBuf::from(value));
            continue;
        }

        if let Some(value) = arg.strip_prefix("--config=") {
            config_path = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| "--config requires a value".to_string())?;
            config_path = Some(PathBuf::from(value));
            continue;
        }

        if arg == "--dry-run" {
            dry_run = true;
            continue;
        }

        return Err(format!("unknown argument: {arg}"));
    }

    let config = match config_path {
        Some(path) => CaptureConfig::load_file(&path).map_err(|error| error.to_string())?,
        None => CaptureConfig::from_env(),
    };
    let capture = if dry_run {
        TrajectoryCapture::new(config, Arc::new(StdoutTransport))
    } else {
        TrajectoryCapture::with_http(config)
    }
    .map_err(|error| error.to_string())?;

    let reader: Box<dyn BufRead> = match &input {
        Some(path) => Box::new(BufReader::new(std::fs::File::open(path).map_err(
            |error| format!("failed to open '{}': {error}", path.display()),
        )?)),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let bus = AgentEventBus::new();
    capture.start_event_listener(&bus);

    let mut replayed = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|error| format!("failed to read input: {error}"))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: Value = serde_json::from_str(line)
            .map_err(|error| format!("line {}: invalid JSON: {error}", index + 1))?;

        if record.get("type").is_some() {
            let control: ControlRecord = serde_json::from_value(record)
                .map_err(|error| format!("line {}: invalid control record: {error}", index + 1))?;
            apply_control(&capture, control).await?;
        } else {
            let signal: AgentSignal = serde_json::from_value(record)
                .map_err(|error| format!("line {}: invalid agent signal: {error}", index + 1))?;
            bus.publish(signal);
            drain().await;
        }
        replayed += 1;
    }

    let stats = capture.stats();
    capture.shutdown().await;
    eprintln!(
        "replayed {replayed} records ({} trajectories left open, {} texts unsettled)",
        stats.active_trajectories, stats.pending_llm_texts
    );
    Ok(())
}

async fn apply_control(capture: &TrajectoryCapture, control: ControlRecord) -> Result<(), String> {
    match control {
        ControlRecord::Start {
            session_key,
            task,
            agent_id,
            parent_agent_id,
            channel,
            metadata,
        } => {
            let options = TrajectoryOptions {
                channel,
                agent_id,
                parent_agent_id,
                metadata,
            };
            if capture
                .start_trajectory(&session_key, &task, options)
                .await
                .is_none()
            {
                eprintln!("start for {session_key} ignored: trajectory already active");
            }
        }
        ControlRecord::End {
            session_key,
            status,
            final_answer,
            error,
        } => {
            let status: TaskStatus = status.parse()?;
            capture
                .end_trajectory(
                    &session_key,
                    status,
                    TaskEndDetails {
                        final_answer,
                        error,
                        metadata: None,
                    },
                )
                .await;
        }
        ControlRecord::Wait { ms } => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        ControlRecord::Flush => capture.flush_buffer().await,
    }
    Ok(())
}

/// Give the listener task a chance to consume what was just published.
async fn drain() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn print_help() {
    println!("Trajectory replay");
    println!();
    println!("Reads JSON lines and feeds them through the capture pipeline.");
    println!("Each line is either an agent signal ({{\"runId\", \"stream\", \"data\", \"sessionKey\"?}})");
    println!("or a control record with a \"type\" of start, end, wait or flush.");
    println!();
    println!("Usage:");
    println!("  cargo run --bin trajectory_replay -- [options]");
    println!();
    println!("Options:");
    println!("  --input <path>     Read records from a file instead of stdin");
    println!("  --config <path>    Load a JSON capture config (env overrides still apply)");
    println!("  --dry-run          Print batches to stdout instead of sending them");
    println!("  -h, --help         Show this help");
}
