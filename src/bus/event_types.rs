//! Stream phase constants and classification.
//!
//! Single source of truth for which tool phases open a span, which close it,
//! and which lifecycle phases release a run's session mapping.

pub const TOOL_PHASE_START: &str = "start";
pub const TOOL_PHASE_UPDATE: &str = "update";
pub const TOOL_PHASE_RESULT: &str = "result";
pub const TOOL_PHASE_END: &str = "end";
pub const TOOL_PHASE_ERROR: &str = "error";

pub const LIFECYCLE_PHASE_START: &str = "start";
pub const LIFECYCLE_PHASE_END: &str = "end";
pub const LIFECYCLE_PHASE_ERROR: &str = "error";

/// What the correlator should do with a tool signal in a given phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPhase {
    Start,
    Update,
    Terminal { failed: bool },
    Unknown,
}

pub fn classify_tool_phase(phase: &str) -> ToolPhase {
    match phase {
        TOOL_PHASE_START => ToolPhase::Start,
        TOOL_PHASE_UPDATE => ToolPhase::Update,
        TOOL_PHASE_RESULT | TOOL_PHASE_END => ToolPhase::Terminal { failed: false },
        TOOL_PHASE_ERROR => ToolPhase::Terminal { failed: true },
        _ => ToolPhase::Unknown,
    }
}

/// Returns true when the run is finished and its correlation entry can go.
pub fn releases_run(lifecycle_phase: &str) -> bool {
    lifecycle_phase == LIFECYCLE_PHASE_END || lifecycle_phase == LIFECYCLE_PHASE_ERROR
}
