//! Signal intake and event delivery.
//!
//! - `AgentEventBus`: in-memory broadcast channel carrying raw agent signals
//!   (tool phases, assistant output, lifecycle) to the correlator.
//! - `EventBatcher`: buffers trajectory events and ships them to the ingest
//!   transport every flush interval or when the buffer reaches its size cap.
//!
//! Signals flow agent → AgentEventBus → correlator → store → EventBatcher →
//! transport.

mod batcher;
mod event_bus;
pub mod event_types;

pub use batcher::EventBatcher;
pub use event_bus::{AgentEventBus, AgentSignal, SignalStream};
